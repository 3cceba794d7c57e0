use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("Real similarity search is not implemented")]
    NotImplemented,
}

/// Options accepted by the image-search surface. Unknown fields on the
/// incoming request are dropped by serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityOptions {
    pub similarity_threshold: f64,

    pub max_results: usize,

    pub min_size: String,

    pub image_type: String,

    pub image_color_type: Option<String>,

    pub dominant_color: Option<String>,

    /// "strict" narrows scores toward the low tiers, "relaxed" widens them.
    pub search_mode: String,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            max_results: 20,
            min_size: "medium".to_string(),
            image_type: "any".to_string(),
            image_color_type: None,
            dominant_color: None,
            search_mode: "balanced".to_string(),
        }
    }
}

impl SimilarityOptions {
    /// Provider-side parameter object for a reverse-image query.
    #[must_use]
    pub fn provider_params(&self) -> Value {
        let mut params = json!({
            "imgSize": size_bucket(&self.min_size),
            "max_results": self.max_results,
        });

        if self.image_type != "any" {
            params["imgType"] = json!(self.image_type);
        }
        if let Some(color_type) = &self.image_color_type {
            params["imgColorType"] = json!(color_type);
        }
        if let Some(color) = &self.dominant_color {
            params["imgDominantColor"] = json!(color);
        }

        params
    }
}

fn size_bucket(min_size: &str) -> &'static str {
    match min_size {
        "large" | "xlarge" => "large",
        "medium" => "medium",
        _ => "small",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    const fn score_range(self) -> (f64, f64) {
        match self {
            Self::High => (0.82, 0.98),
            Self::Medium => (0.6, 0.82),
            Self::Low => (0.35, 0.6),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarCandidate {
    pub source: String,

    pub url: String,

    pub thumbnail: String,

    pub similarity: f64,

    pub tier: QualityTier,
}

#[async_trait]
pub trait SimilarityProvider: Send + Sync {
    async fn find_similar(
        &self,
        image_url: &str,
        options: &SimilarityOptions,
    ) -> Result<Vec<SimilarCandidate>, SimilarityError>;
}

/// Candidate hosts grouped by the requested image type. "any" takes the
/// full set.
fn sources_for(image_type: &str) -> Vec<&'static str> {
    match image_type {
        "face" | "photo" => vec![
            "instagram.com",
            "facebook.com",
            "pinterest.com",
            "flickr.com",
            "500px.com",
            "tumblr.com",
        ],
        "clipart" | "lineart" => vec![
            "shutterstock.com",
            "istockphoto.com",
            "vecteezy.com",
            "freepik.com",
        ],
        "animated" => vec!["giphy.com", "tenor.com", "imgur.com"],
        _ => vec![
            "instagram.com",
            "facebook.com",
            "pinterest.com",
            "flickr.com",
            "tumblr.com",
            "imgur.com",
            "reddit.com",
            "deviantart.com",
        ],
    }
}

/// Similarity is simulated, not computed from image content. Scores come
/// from a seeded generator so tests are reproducible; a production
/// deployment would swap in a perceptual-hash or embedding service here.
pub struct MockSimilarityProvider {
    rng: Mutex<StdRng>,
}

impl MockSimilarityProvider {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Rank buckets: the top slots get the high tier, the middle gets
    /// medium, the tail gets low. Strict mode demotes one tier.
    fn tier_for(rank: usize, total: usize, search_mode: &str) -> QualityTier {
        let base = if rank * 3 < total {
            QualityTier::High
        } else if rank * 3 < total * 2 {
            QualityTier::Medium
        } else {
            QualityTier::Low
        };

        match (search_mode, base) {
            ("strict", QualityTier::High) => QualityTier::Medium,
            ("strict", _) => QualityTier::Low,
            (_, tier) => tier,
        }
    }
}

#[async_trait]
impl SimilarityProvider for MockSimilarityProvider {
    async fn find_similar(
        &self,
        image_url: &str,
        options: &SimilarityOptions,
    ) -> Result<Vec<SimilarCandidate>, SimilarityError> {
        let sources = sources_for(&options.image_type);
        let total = sources.len();
        let encoded = urlencoding::encode(image_url);

        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut candidates: Vec<SimilarCandidate> = sources
            .into_iter()
            .enumerate()
            .map(|(rank, source)| {
                let tier = Self::tier_for(rank, total, &options.search_mode);
                let (low, high) = tier.score_range();
                let similarity = rng.random_range(low..high);

                SimilarCandidate {
                    source: source.to_string(),
                    url: format!("https://{source}/match/{rank}?ref={encoded}"),
                    thumbnail: format!("https://{source}/thumb/{rank}.jpg"),
                    similarity,
                    tier,
                }
            })
            .filter(|c| c.similarity >= options.similarity_threshold)
            .collect();

        candidates.truncate(options.max_results);
        Ok(candidates)
    }
}

/// Placeholder for a real perceptual-similarity backend.
pub struct RealSimilarityProvider;

#[async_trait]
impl SimilarityProvider for RealSimilarityProvider {
    async fn find_similar(
        &self,
        _image_url: &str,
        _options: &SimilarityOptions,
    ) -> Result<Vec<SimilarCandidate>, SimilarityError> {
        Err(SimilarityError::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_buckets_map_as_documented() {
        assert_eq!(size_bucket("large"), "large");
        assert_eq!(size_bucket("xlarge"), "large");
        assert_eq!(size_bucket("medium"), "medium");
        assert_eq!(size_bucket("small"), "small");
        assert_eq!(size_bucket("anything"), "small");
    }

    #[test]
    fn provider_params_skip_absent_options() {
        let options = SimilarityOptions::default();
        let params = options.provider_params();
        assert_eq!(params["imgSize"], "medium");
        assert!(params.get("imgType").is_none());
        assert!(params.get("imgDominantColor").is_none());
    }

    #[tokio::test]
    async fn same_seed_gives_same_scores() {
        let options = SimilarityOptions {
            similarity_threshold: 0.0,
            ..SimilarityOptions::default()
        };

        let a = MockSimilarityProvider::new(7)
            .find_similar("https://example.com/i.jpg", &options)
            .await
            .unwrap();
        let b = MockSimilarityProvider::new(7)
            .find_similar("https://example.com/i.jpg", &options)
            .await
            .unwrap();

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert!((x.similarity - y.similarity).abs() < f64::EPSILON);
        }
    }

    #[tokio::test]
    async fn threshold_drops_low_candidates() {
        let options = SimilarityOptions {
            similarity_threshold: 0.82,
            ..SimilarityOptions::default()
        };

        let results = MockSimilarityProvider::new(1)
            .find_similar("https://example.com/i.jpg", &options)
            .await
            .unwrap();

        assert!(results.iter().all(|c| c.similarity >= 0.82));
    }

    #[tokio::test]
    async fn image_type_limits_sources() {
        let options = SimilarityOptions {
            similarity_threshold: 0.0,
            image_type: "animated".to_string(),
            ..SimilarityOptions::default()
        };

        let results = MockSimilarityProvider::new(3)
            .find_similar("https://example.com/i.gif", &options)
            .await
            .unwrap();

        let allowed = ["giphy.com", "tenor.com", "imgur.com"];
        assert!(results.iter().all(|c| allowed.contains(&c.source.as_str())));
    }

    #[test]
    fn strict_mode_demotes_tiers() {
        assert_eq!(
            MockSimilarityProvider::tier_for(0, 9, "strict"),
            QualityTier::Medium
        );
        assert_eq!(
            MockSimilarityProvider::tier_for(0, 9, "balanced"),
            QualityTier::High
        );
        assert_eq!(
            MockSimilarityProvider::tier_for(8, 9, "strict"),
            QualityTier::Low
        );
    }
}
