use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::ProviderConfig;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected the request ({code}): {message}")]
    Api { code: i64, message: String },

    #[error("No provider credentials available")]
    MissingCredentials,

    #[error("Credential endpoint error: {0}")]
    CredentialEndpoint(String),
}

/// Custom-search response shape. `error` is populated instead of `items`
/// when the upstream rejects the call with a 200-style error body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ProviderItem>>,

    #[serde(
        default,
        rename = "searchInformation",
        skip_serializing_if = "Option::is_none"
    )]
    pub search_information: Option<SearchInformation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderApiError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderApiError {
    pub code: i64,

    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchInformation {
    #[serde(default, rename = "totalResults")]
    pub total_results: Option<String>,

    #[serde(default, rename = "searchTime")]
    pub search_time: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderItem {
    #[serde(default)]
    pub title: String,

    pub link: String,

    #[serde(default, rename = "displayLink")]
    pub display_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagemap: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Value>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn text_search(
        &self,
        query: &str,
        params: &Value,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Same endpoint with `searchType=image`; `query` is the public URL of
    /// the uploaded image.
    async fn image_search(
        &self,
        query: &str,
        params: &Value,
    ) -> Result<ProviderResponse, ProviderError>;
}

#[derive(Debug, Clone, Deserialize)]
struct IssuedCredentials {
    api_key: String,

    engine_id: String,
}

pub struct GoogleSearchClient {
    http: reqwest::Client,
    config: ProviderConfig,
    issued: RwLock<Option<IssuedCredentials>>,
}

impl GoogleSearchClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(u64::from(config.request_timeout_seconds)))
            .build()?;

        Ok(Self {
            http,
            config,
            issued: RwLock::new(None),
        })
    }

    /// Credential chain: runtime-issued pair, then config, then environment.
    async fn credentials(&self) -> Result<(String, String), ProviderError> {
        if let Some(issued) = self.issued.read().await.as_ref() {
            return Ok((issued.api_key.clone(), issued.engine_id.clone()));
        }

        if let Some(endpoint) = &self.config.credential_endpoint {
            match self.fetch_issued(endpoint).await {
                Ok(issued) => {
                    let pair = (issued.api_key.clone(), issued.engine_id.clone());
                    *self.issued.write().await = Some(issued);
                    return Ok(pair);
                }
                Err(err) => {
                    warn!("Credential endpoint failed, falling back to static key: {err}");
                }
            }
        }

        if !self.config.api_key.is_empty() && !self.config.engine_id.is_empty() {
            return Ok((self.config.api_key.clone(), self.config.engine_id.clone()));
        }

        match (
            std::env::var("GUARDARR_PROVIDER_API_KEY"),
            std::env::var("GUARDARR_PROVIDER_ENGINE_ID"),
        ) {
            (Ok(key), Ok(engine)) if !key.is_empty() && !engine.is_empty() => Ok((key, engine)),
            _ => Err(ProviderError::MissingCredentials),
        }
    }

    async fn fetch_issued(&self, endpoint: &str) -> Result<IssuedCredentials, ProviderError> {
        let response = self.http.get(endpoint).send().await?;

        if !response.status().is_success() {
            return Err(ProviderError::CredentialEndpoint(format!(
                "status {}",
                response.status()
            )));
        }

        Ok(response.json::<IssuedCredentials>().await?)
    }

    fn query_pairs(query: &str, params: &Value, key: &str, engine_id: &str) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("key".to_string(), key.to_string()),
            ("cx".to_string(), engine_id.to_string()),
            ("q".to_string(), query.to_string()),
        ];

        if let Some(n) = params.get("max_results").and_then(Value::as_i64) {
            // The upstream caps a single page at 10 items.
            pairs.push(("num".to_string(), n.clamp(1, 10).to_string()));
        }
        if let Some(lang) = params.get("language").and_then(Value::as_str) {
            pairs.push(("lr".to_string(), format!("lang_{lang}")));
        }
        if let Some(country) = params.get("country").and_then(Value::as_str) {
            pairs.push(("gl".to_string(), country.to_string()));
        }
        if let Some(filter) = params.get("content_filter").and_then(Value::as_str) {
            let safe = if filter == "off" { "off" } else { "active" };
            pairs.push(("safe".to_string(), safe.to_string()));
        }
        if let Some(site) = params.get("site").and_then(Value::as_str) {
            pairs.push(("siteSearch".to_string(), site.to_string()));
        }

        pairs
    }

    async fn execute(
        &self,
        query: &str,
        params: &Value,
        image: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let (key, engine_id) = self.credentials().await?;
        let mut pairs = Self::query_pairs(query, params, &key, &engine_id);
        if image {
            pairs.push(("searchType".to_string(), "image".to_string()));
        }

        debug!(image, "Dispatching provider search");
        metrics::counter!("guardarr_provider_requests_total").increment(1);

        let response = self
            .http
            .get(&self.config.base_url)
            .query(&pairs)
            .send()
            .await?;

        let body: ProviderResponse = response.json().await?;

        if let Some(err) = &body.error {
            metrics::counter!("guardarr_provider_errors_total").increment(1);
            return Err(ProviderError::Api {
                code: err.code,
                message: err.message.clone(),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl SearchProvider for GoogleSearchClient {
    async fn text_search(
        &self,
        query: &str,
        params: &Value,
    ) -> Result<ProviderResponse, ProviderError> {
        self.execute(query, params, false).await
    }

    async fn image_search(
        &self,
        query: &str,
        params: &Value,
    ) -> Result<ProviderResponse, ProviderError> {
        self.execute(query, params, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_parses_camel_case_fields() {
        let raw = json!({
            "items": [{
                "title": "Example",
                "link": "https://example.com/a",
                "displayLink": "example.com",
                "snippet": "a snippet"
            }],
            "searchInformation": { "totalResults": "2", "searchTime": 0.21 }
        });

        let parsed: ProviderResponse = serde_json::from_value(raw).unwrap();
        let items = parsed.items.unwrap();
        assert_eq!(items[0].display_link.as_deref(), Some("example.com"));
        assert_eq!(
            parsed.search_information.unwrap().total_results.as_deref(),
            Some("2")
        );
    }

    #[test]
    fn error_body_parses_without_items() {
        let raw = json!({
            "error": { "code": 429, "message": "Quota exceeded" }
        });

        let parsed: ProviderResponse = serde_json::from_value(raw).unwrap();
        assert!(parsed.items.is_none());
        assert_eq!(parsed.error.unwrap().code, 429);
    }

    #[test]
    fn query_pairs_clamp_result_count() {
        let params = json!({ "max_results": 50, "language": "en", "content_filter": "off" });
        let pairs = GoogleSearchClient::query_pairs("test", &params, "k", "cx");

        assert!(pairs.contains(&("num".to_string(), "10".to_string())));
        assert!(pairs.contains(&("lr".to_string(), "lang_en".to_string())));
        assert!(pairs.contains(&("safe".to_string(), "off".to_string())));
    }
}
