use serde::{Deserialize, Serialize};

/// Coarse relevance label derived from the heuristic match score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Website,
    Social,
    Image,
}

/// A single candidate match produced by the result formatter. Derived from
/// a provider response item, never authored; immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundResult {
    pub id: String,

    pub search_id: String,

    pub title: String,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    /// Display domain the match was found on.
    pub source: String,

    pub match_level: MatchLevel,

    pub found_at: String,

    pub kind: ResultKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}
