use serde::Serialize;
use serde_json::Value;

use crate::clients::provider::{ProviderItem, ProviderResponse};
use crate::models::{FoundResult, MatchLevel, QueryType, ResultKind};

const VIDEO_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "tiktok.com",
    "dailymotion.com",
    "twitch.tv",
];

const IMAGE_DOMAINS: &[&str] = &[
    "imgur.com",
    "flickr.com",
    "500px.com",
    "giphy.com",
    "tenor.com",
    "unsplash.com",
];

const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "reddit.com",
    "tumblr.com",
    "threads.net",
];

/// Formatter output plus the flags the caller needs to tell a degraded
/// response from a genuinely empty one.
#[derive(Debug, Clone, Serialize)]
pub struct FormattedResults {
    pub search_id: String,

    pub results: Vec<FoundResult>,

    pub total_results: usize,

    /// True when the results are the deterministic sample set shown after
    /// a provider failure.
    pub fallback: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

/// Fixed-priority classification: video hosts count as social, then image
/// signals, then social signals, then website. First matching rule wins.
#[must_use]
pub fn classify_item(item: &ProviderItem, query_type: QueryType) -> ResultKind {
    let domain = item
        .display_link
        .as_deref()
        .unwrap_or(&item.link)
        .to_lowercase();
    let title = item.title.to_lowercase();

    if VIDEO_DOMAINS.iter().any(|d| domain.contains(d)) {
        return ResultKind::Social;
    }

    let has_image_pagemap = item
        .pagemap
        .as_ref()
        .is_some_and(|p| p.get("cse_image").is_some() || p.get("imageobject").is_some());
    if IMAGE_DOMAINS.iter().any(|d| domain.contains(d))
        || has_image_pagemap
        || item.image.is_some()
        || query_type == QueryType::Image
    {
        return ResultKind::Image;
    }

    if SOCIAL_DOMAINS.iter().any(|d| domain.contains(d)) || title.contains("profile") {
        return ResultKind::Social;
    }

    ResultKind::Website
}

fn og_title(item: &ProviderItem) -> Option<String> {
    item.pagemap
        .as_ref()?
        .get("metatags")?
        .get(0)?
        .get("og:title")?
        .as_str()
        .map(str::to_lowercase)
}

/// Weighted heuristic score in [0, 1]. The weights are a heuristic, not a
/// calibrated model; they are load-bearing for match-level parity.
#[must_use]
pub fn match_score(item: &ProviderItem, query: &str, position: usize, total: usize) -> f64 {
    let needle = query.to_lowercase();
    let mut score: f64 = 0.0;

    if total > 0 {
        #[allow(clippy::cast_precision_loss)]
        let rank = 1.0 - position as f64 / total as f64;
        score += rank.max(0.0);
    }

    if item.title.to_lowercase().contains(&needle) {
        score += 0.4;
    }
    if item
        .snippet
        .as_deref()
        .is_some_and(|s| s.to_lowercase().contains(&needle))
    {
        score += 0.2;
    }
    if og_title(item).is_some_and(|t| t.contains(&needle)) {
        score += 0.2;
    }

    let compact: String = needle.split_whitespace().collect();
    if !compact.is_empty() && item.link.to_lowercase().contains(&compact) {
        score += 0.2;
    }

    score.clamp(0.0, 1.0)
}

#[must_use]
pub fn level_for(score: f64) -> MatchLevel {
    if score > 0.65 {
        MatchLevel::High
    } else if score < 0.3 {
        MatchLevel::Low
    } else {
        MatchLevel::Medium
    }
}

fn thumbnail_of(item: &ProviderItem) -> Option<String> {
    let from_pagemap = item
        .pagemap
        .as_ref()
        .and_then(|p| p.get("cse_thumbnail"))
        .and_then(|t| t.get(0))
        .and_then(|t| t.get("src"))
        .and_then(Value::as_str);

    let from_image = item
        .image
        .as_ref()
        .and_then(|i| i.get("thumbnailLink"))
        .and_then(Value::as_str);

    from_pagemap.or(from_image).map(str::to_string)
}

fn source_of(item: &ProviderItem) -> String {
    item.display_link.clone().unwrap_or_else(|| {
        url::Url::parse(&item.link)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| item.link.clone())
    })
}

/// Turns a successful provider response into scored result records.
#[must_use]
pub fn format_response(
    search_id: &str,
    query: &str,
    query_type: QueryType,
    response: &ProviderResponse,
    found_at: &str,
) -> FormattedResults {
    let items = response.items.as_deref().unwrap_or_default();
    let total = items.len();

    let results: Vec<FoundResult> = items
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let score = match_score(item, query, position, total);
            FoundResult {
                id: format!("{search_id}_{position}"),
                search_id: search_id.to_string(),
                title: item.title.clone(),
                url: item.link.clone(),
                thumbnail: thumbnail_of(item),
                source: source_of(item),
                match_level: level_for(score),
                found_at: found_at.to_string(),
                kind: classify_item(item, query_type),
                snippet: item.snippet.clone(),
            }
        })
        .collect();

    let notice = if results.is_empty() {
        Some("No matches found for this search.".to_string())
    } else {
        None
    };

    FormattedResults {
        search_id: search_id.to_string(),
        total_results: results.len(),
        results,
        fallback: false,
        notice,
    }
}

/// Deterministic sample set shown when fetching or formatting fails, so
/// the results page is never blank.
#[must_use]
pub fn sample_results(search_id: &str, query: &str, found_at: &str) -> FormattedResults {
    let entries: [(&str, &str, ResultKind, MatchLevel); 12] = [
        ("youtube.com", "watch?v=sample1", ResultKind::Social, MatchLevel::High),
        ("facebook.com", "posts/sample2", ResultKind::Social, MatchLevel::High),
        ("instagram.com", "p/sample3", ResultKind::Social, MatchLevel::High),
        ("twitter.com", "status/sample4", ResultKind::Social, MatchLevel::Medium),
        ("tiktok.com", "video/sample5", ResultKind::Social, MatchLevel::Medium),
        ("reddit.com", "comments/sample6", ResultKind::Social, MatchLevel::Medium),
        ("pinterest.com", "pin/sample7", ResultKind::Image, MatchLevel::Medium),
        ("imgur.com", "gallery/sample8", ResultKind::Image, MatchLevel::Low),
        ("tumblr.com", "post/sample9", ResultKind::Social, MatchLevel::Low),
        ("vimeo.com", "sample10", ResultKind::Social, MatchLevel::Low),
        ("dailymotion.com", "video/sample11", ResultKind::Social, MatchLevel::Low),
        ("blogspot.com", "2024/sample12", ResultKind::Website, MatchLevel::Low),
    ];

    let results = entries
        .iter()
        .enumerate()
        .map(|(position, (domain, path, kind, level))| FoundResult {
            id: format!("{search_id}_sample_{position}"),
            search_id: search_id.to_string(),
            title: format!("Possible match for \"{query}\" on {domain}"),
            url: format!("https://{domain}/{path}"),
            thumbnail: None,
            source: (*domain).to_string(),
            match_level: *level,
            found_at: found_at.to_string(),
            kind: *kind,
            snippet: None,
        })
        .collect::<Vec<_>>();

    FormattedResults {
        search_id: search_id.to_string(),
        total_results: results.len(),
        results,
        fallback: true,
        notice: Some(
            "Live results are temporarily unavailable; showing sample matches.".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(title: &str, link: &str, display: &str, snippet: Option<&str>) -> ProviderItem {
        ProviderItem {
            title: title.to_string(),
            link: link.to_string(),
            display_link: Some(display.to_string()),
            snippet: snippet.map(str::to_string),
            pagemap: None,
            image: None,
        }
    }

    #[test]
    fn video_hosts_classify_as_social_before_image_rules() {
        let mut it = item("clip", "https://youtube.com/watch?v=1", "youtube.com", None);
        it.image = Some(json!({ "thumbnailLink": "x" }));
        assert_eq!(classify_item(&it, QueryType::Name), ResultKind::Social);
    }

    #[test]
    fn image_query_forces_image_kind() {
        let it = item("page", "https://example.com/a", "example.com", None);
        assert_eq!(classify_item(&it, QueryType::Image), ResultKind::Image);
        assert_eq!(classify_item(&it, QueryType::Name), ResultKind::Website);
    }

    #[test]
    fn profile_in_title_is_social() {
        let it = item(
            "Jane Doe profile and photos",
            "https://example.com/jane",
            "example.com",
            None,
        );
        assert_eq!(classify_item(&it, QueryType::Name), ResultKind::Social);
    }

    #[test]
    fn earlier_rank_never_scores_lower() {
        let it = item("unrelated", "https://example.com/a", "example.com", None);
        let first = match_score(&it, "jane doe", 0, 10);
        let later = match_score(&it, "jane doe", 7, 10);
        assert!(first >= later);
    }

    #[test]
    fn exact_title_match_at_top_is_high() {
        let it = item(
            "Jane Doe official page",
            "https://example.com/a",
            "example.com",
            Some("all about jane doe"),
        );
        let score = match_score(&it, "jane doe", 0, 10);
        assert!((score - 1.0).abs() < f64::EPSILON);
        assert_eq!(level_for(score), MatchLevel::High);
    }

    #[test]
    fn url_match_strips_query_whitespace() {
        let it = item("x", "https://example.com/janedoe/pics", "example.com", None);
        // Last rank kills the positional term; only the URL term fires.
        let score = match_score(&it, "jane doe", 10, 10);
        assert!((score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn og_title_contributes() {
        let mut it = item("x", "https://example.com/a", "example.com", None);
        it.pagemap = Some(json!({ "metatags": [{ "og:title": "Jane Doe gallery" }] }));
        let score = match_score(&it, "jane doe", 10, 10);
        assert!((score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn empty_successful_response_is_not_fallback() {
        let response = ProviderResponse {
            items: Some(vec![]),
            ..ProviderResponse::default()
        };
        let formatted = format_response("s1", "jane doe", QueryType::Name, &response, "now");
        assert_eq!(formatted.total_results, 0);
        assert!(!formatted.fallback);
        assert!(formatted.notice.is_some());
    }

    #[test]
    fn sample_set_has_twelve_deterministic_entries() {
        let a = sample_results("s1", "jane doe", "now");
        let b = sample_results("s1", "jane doe", "now");
        assert_eq!(a.total_results, 12);
        assert!(a.fallback);
        assert_eq!(
            a.results.iter().map(|r| &r.url).collect::<Vec<_>>(),
            b.results.iter().map(|r| &r.url).collect::<Vec<_>>()
        );
    }
}
