use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Name,
    Hashtag,
    Image,
}

impl QueryType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Hashtag => "hashtag",
            Self::Image => "image",
        }
    }
}

/// A persisted search initiated by a user. One query owns many results.
/// Immutable after completion except for the scheduling bookkeeping
/// (`schedule_interval_minutes`, `last_run`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub user_id: String,

    pub query_type: QueryType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Merged search options as sent to the provider.
    #[serde(default)]
    pub search_params: serde_json::Value,

    #[serde(default)]
    pub scheduled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_interval_minutes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl SearchQuery {
    /// Effective query string handed to the provider.
    #[must_use]
    pub fn effective_query(&self) -> Option<&str> {
        match self.query_type {
            QueryType::Image => self.image_url.as_deref(),
            _ => self.query_text.as_deref(),
        }
    }
}
