use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::QueryType;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TextSearchRequest {
    pub query: String,

    #[serde(default = "default_query_type")]
    pub query_type: QueryType,

    /// Partial option object merged over the configured defaults.
    #[serde(default)]
    pub options: Value,

    #[serde(default)]
    pub scheduled: bool,

    #[serde(default)]
    pub schedule_interval_minutes: Option<u32>,
}

const fn default_query_type() -> QueryType {
    QueryType::Name
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    #[serde(default = "default_page")]
    pub page: usize,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

const fn default_page() -> usize {
    1
}

const fn default_page_size() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct VerifyCheckoutRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SystemStatusDto {
    pub version: String,
    pub uptime_seconds: u64,
    pub cache_entries: usize,
    pub tracked_users: usize,
    pub scheduler_enabled: bool,
    pub persistence_enabled: bool,
}
