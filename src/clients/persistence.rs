use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::models::{SearchQuery, Subscription};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store rejected the request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Record not found")]
    NotFound,

    #[error("Invalid or expired token")]
    Unauthorized,

    #[error("Malformed store response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    /// Row-level-security denial on the search tables. The caller degrades
    /// to a temporary id instead of failing the request.
    #[must_use]
    pub fn is_popular_searches_denial(&self) -> bool {
        match self {
            Self::Api { code, message, .. } => {
                code.as_deref() == Some("42501") || message.contains("popular_searches")
            }
            _ => false,
        }
    }
}

/// Authenticated account as resolved from a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,

    pub email: String,

    #[serde(default)]
    pub role: Option<String>,
}

#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn create_query(&self, query: &SearchQuery) -> Result<SearchQuery, StoreError>;

    async fn get_query(&self, id: &str) -> Result<Option<SearchQuery>, StoreError>;

    async fn user_queries(&self, user_id: &str) -> Result<Vec<SearchQuery>, StoreError>;

    /// Deletes the query if it belongs to `user_id`. Returns whether a row
    /// was removed.
    async fn delete_query(&self, id: &str, user_id: &str) -> Result<bool, StoreError>;

    async fn scheduled_queries(&self) -> Result<Vec<SearchQuery>, StoreError>;

    async fn mark_run(&self, id: &str) -> Result<(), StoreError>;

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError>;

    /// Stores raw image bytes and returns a public URL for them.
    async fn upload_image(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError>;

    async fn auth_user(&self, token: &str) -> Result<Option<AuthUser>, StoreError>;
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,

    #[serde(default)]
    message: Option<String>,
}

/// PostgREST-backed store. Tables live under `/rest/v1/`, storage under
/// `/storage/v1/`, auth under `/auth/v1/`.
pub struct HttpQueryStore {
    http: reqwest::Client,
    config: PersistenceConfig,
}

impl HttpQueryStore {
    pub fn new(config: PersistenceConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(u64::from(config.request_timeout_seconds)))
            .build()?;

        Ok(Self { http, config })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.config.base_url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: PostgrestError = serde_json::from_str(&body).unwrap_or(PostgrestError {
            code: None,
            message: None,
        });

        Err(StoreError::Api {
            status: status.as_u16(),
            code: parsed.code,
            message: parsed.message.unwrap_or(body),
        })
    }
}

#[async_trait]
impl QueryStore for HttpQueryStore {
    async fn create_query(&self, query: &SearchQuery) -> Result<SearchQuery, StoreError> {
        debug!(user_id = %query.user_id, "Persisting search query");

        let response = self
            .authed(self.http.post(self.rest_url("searches")))
            .header("Prefer", "return=representation")
            .json(query)
            .send()
            .await?;

        let mut rows: Vec<SearchQuery> = Self::check(response).await?.json().await?;
        rows.pop().ok_or(StoreError::NotFound)
    }

    async fn get_query(&self, id: &str) -> Result<Option<SearchQuery>, StoreError> {
        let response = self
            .authed(self.http.get(self.rest_url("searches")))
            .query(&[("id", format!("eq.{id}")), ("limit", "1".to_string())])
            .send()
            .await?;

        let mut rows: Vec<SearchQuery> = Self::check(response).await?.json().await?;
        Ok(rows.pop())
    }

    async fn user_queries(&self, user_id: &str) -> Result<Vec<SearchQuery>, StoreError> {
        let response = self
            .authed(self.http.get(self.rest_url("searches")))
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_query(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let response = self
            .authed(self.http.delete(self.rest_url("searches")))
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{id}")), ("user_id", format!("eq.{user_id}"))])
            .send()
            .await?;

        let rows: Vec<SearchQuery> = Self::check(response).await?.json().await?;
        Ok(!rows.is_empty())
    }

    async fn scheduled_queries(&self) -> Result<Vec<SearchQuery>, StoreError> {
        let response = self
            .authed(self.http.get(self.rest_url("searches")))
            .query(&[("scheduled", "eq.true".to_string())])
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn mark_run(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .authed(self.http.patch(self.rest_url("searches")))
            .query(&[("id", format!("eq.{id}"))])
            .json(&serde_json::json!({ "last_run": Utc::now().to_rfc3339() }))
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
        let response = self
            .authed(self.http.get(self.rest_url("subscriptions")))
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("select", "status,plan:plans(*)".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let mut rows: Vec<Subscription> = Self::check(response).await?.json().await?;
        Ok(rows.pop())
    }

    async fn upload_image(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let path = format!("search-images/{file_name}");
        let url = format!("{}/storage/v1/object/{path}", self.config.base_url);

        let response = self
            .authed(self.http.post(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(format!(
            "{}/storage/v1/object/public/{path}",
            self.config.base_url
        ))
    }

    async fn auth_user(&self, token: &str) -> Result<Option<AuthUser>, StoreError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.config.base_url))
            .header("apikey", &self.config.service_key)
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        Ok(Some(Self::check(response).await?.json().await?))
    }
}

/// In-memory store used when persistence is disabled and in tests.
#[derive(Default)]
pub struct MemoryQueryStore {
    queries: Mutex<HashMap<String, SearchQuery>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    users: Mutex<HashMap<String, AuthUser>>,
    uploads: Mutex<Vec<String>>,
    deny_inserts: AtomicBool,
}

impl MemoryQueryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every insert fail with the row-level-security denial the
    /// degradation path keys on.
    pub fn deny_inserts(&self, deny: bool) {
        self.deny_inserts.store(deny, Ordering::SeqCst);
    }

    pub fn put_subscription(&self, user_id: &str, subscription: Subscription) {
        self.subscriptions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(user_id.to_string(), subscription);
    }

    pub fn put_user(&self, token: &str, user: AuthUser) {
        self.users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(token.to_string(), user);
    }

    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.uploads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl QueryStore for MemoryQueryStore {
    async fn create_query(&self, query: &SearchQuery) -> Result<SearchQuery, StoreError> {
        if self.deny_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Api {
                status: 403,
                code: Some("42501".to_string()),
                message: "new row violates row-level security policy".to_string(),
            });
        }

        let mut stored = query.clone();
        if stored.id.is_none() {
            stored.id = Some(Uuid::new_v4().to_string());
        }
        if stored.created_at.is_none() {
            stored.created_at = Some(Utc::now().to_rfc3339());
        }

        let id = stored.id.clone().ok_or(StoreError::NotFound)?;
        self.queries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_query(&self, id: &str) -> Result<Option<SearchQuery>, StoreError> {
        Ok(self
            .queries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn user_queries(&self, user_id: &str) -> Result<Vec<SearchQuery>, StoreError> {
        let mut rows: Vec<SearchQuery> = self
            .queries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|q| q.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn delete_query(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let mut queries = self
            .queries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match queries.get(id) {
            Some(q) if q.user_id == user_id => {
                queries.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scheduled_queries(&self) -> Result<Vec<SearchQuery>, StoreError> {
        Ok(self
            .queries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|q| q.scheduled)
            .cloned()
            .collect())
    }

    async fn mark_run(&self, id: &str) -> Result<(), StoreError> {
        let mut queries = self
            .queries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let query = queries.get_mut(id).ok_or(StoreError::NotFound)?;
        query.last_run = Some(Utc::now().to_rfc3339());
        Ok(())
    }

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(user_id)
            .cloned())
    }

    async fn upload_image(
        &self,
        file_name: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StoreError> {
        let url = format!("memory://search-images/{file_name}");
        self.uploads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(url.clone());
        Ok(url)
    }

    async fn auth_user(&self, token: &str) -> Result<Option<AuthUser>, StoreError> {
        Ok(self
            .users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(token)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryType;

    fn query(user: &str) -> SearchQuery {
        SearchQuery {
            id: None,
            user_id: user.to_string(),
            query_type: QueryType::Name,
            query_text: Some("jane doe".to_string()),
            image_url: None,
            search_params: serde_json::Value::Null,
            scheduled: false,
            schedule_interval_minutes: None,
            last_run: None,
            created_at: None,
        }
    }

    #[test]
    fn rls_denial_matches_code_and_message() {
        let by_code = StoreError::Api {
            status: 403,
            code: Some("42501".to_string()),
            message: "denied".to_string(),
        };
        assert!(by_code.is_popular_searches_denial());

        let by_message = StoreError::Api {
            status: 500,
            code: None,
            message: "trigger on popular_searches failed".to_string(),
        };
        assert!(by_message.is_popular_searches_denial());

        assert!(!StoreError::NotFound.is_popular_searches_denial());
    }

    #[tokio::test]
    async fn memory_store_round_trips_queries() {
        let store = MemoryQueryStore::new();
        let created = store.create_query(&query("u1")).await.unwrap();
        let id = created.id.clone().unwrap();

        let fetched = store.get_query(&id).await.unwrap().unwrap();
        assert_eq!(fetched.query_text.as_deref(), Some("jane doe"));

        assert!(store.delete_query(&id, "u1").await.unwrap());
        assert!(store.get_query(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_requires_matching_owner() {
        let store = MemoryQueryStore::new();
        let created = store.create_query(&query("u1")).await.unwrap();
        let id = created.id.unwrap();

        assert!(!store.delete_query(&id, "someone-else").await.unwrap());
        assert!(store.get_query(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deny_inserts_produces_rls_denial() {
        let store = MemoryQueryStore::new();
        store.deny_inserts(true);

        let err = store.create_query(&query("u1")).await.unwrap_err();
        assert!(err.is_popular_searches_denial());
    }
}
