use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheSource, SearchCache, cache_key};
use crate::clients::persistence::{QueryStore, StoreError};
use crate::clients::provider::{ProviderError, ProviderItem, ProviderResponse, SearchProvider};
use crate::clock::Clock;
use crate::config::SearchDefaults;
use crate::models::{QueryType, SearchQuery, Tier};
use crate::quota::{QuotaDecision, QuotaService};
use crate::services::results::{FormattedResults, format_response, sample_results};
use crate::services::similarity::{SimilarityOptions, SimilarityProvider};
use crate::services::validation::{ValidationError, format_hashtag, sanitize_query};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{}", .0.denial_message())]
    QuotaExceeded(QuotaDecision),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Search not found: {0}")]
    NotFound(String),
}

/// Handler decision, free of presentation concerns. The API layer turns
/// this into a response envelope.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchOutcome {
    pub search_id: String,

    /// Served from the query cache without touching store or provider.
    pub cached: bool,

    /// Persistence was denied and the id is session-scoped (`temp_` prefix).
    pub degraded: bool,
}

pub struct TextSearchInput {
    pub query_type: QueryType,

    pub query: String,

    /// Partial option object shallow-merged over the configured defaults.
    pub options: Value,

    pub scheduled: bool,

    pub schedule_interval_minutes: Option<u32>,
}

pub struct ImageSearchInput {
    pub file_name: String,

    pub content_type: String,

    pub bytes: Vec<u8>,

    pub options: SimilarityOptions,
}

type PendingCall = Shared<BoxFuture<'static, Result<ProviderResponse, Arc<ProviderError>>>>;

/// Content hash of an uploaded image, used as its cache identity.
fn image_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Orchestrates validate -> quota -> cache -> persist -> provider for both
/// search flavors. Provider failures after persistence are logged, never
/// propagated; the search id is always the source of truth for retrieval.
pub struct SearchService {
    cache: Arc<SearchCache>,
    quota: Arc<QuotaService>,
    store: Arc<dyn QueryStore>,
    provider: Arc<dyn SearchProvider>,
    similarity: Arc<dyn SimilarityProvider>,
    defaults: SearchDefaults,
    cost_per_call: f64,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl SearchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<SearchCache>,
        quota: Arc<QuotaService>,
        store: Arc<dyn QueryStore>,
        provider: Arc<dyn SearchProvider>,
        similarity: Arc<dyn SimilarityProvider>,
        defaults: SearchDefaults,
        cost_per_call: f64,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            quota,
            store,
            provider,
            similarity,
            defaults,
            cost_per_call,
            clock,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Shallow merge: user-supplied keys win, everything else comes from
    /// the configured defaults. Out-of-range values pass through unchanged.
    fn merge_options(&self, user: &Value) -> Value {
        let mut merged = json!({
            "similarity_threshold": self.defaults.similarity_threshold,
            "max_results": self.defaults.max_results,
            "search_mode": self.defaults.search_mode,
            "language": self.defaults.language,
            "country": self.defaults.country,
            "content_filter": self.defaults.content_filter,
        });

        if let (Some(target), Some(overrides)) = (merged.as_object_mut(), user.as_object()) {
            for (key, value) in overrides {
                target.insert(key.clone(), value.clone());
            }
        }

        merged
    }

    fn now_rfc3339(&self) -> String {
        #[allow(clippy::cast_possible_wrap)]
        chrono::DateTime::from_timestamp_millis(self.clock.now_ms() as i64)
            .unwrap_or_default()
            .to_rfc3339()
    }

    fn check_quota(&self, user_id: &str, tier: Tier) -> Result<(), SearchError> {
        let decision = self.quota.check(user_id, tier);
        if decision.allowed {
            Ok(())
        } else {
            info!(user_id, "Search denied by quota");
            Err(SearchError::QuotaExceeded(decision))
        }
    }

    /// Persists the query record, degrading to a session-scoped temporary
    /// id when the store denies the write over the popular-searches view.
    async fn persist_query(&self, query: &SearchQuery) -> Result<(String, bool), SearchError> {
        match self.store.create_query(query).await {
            Ok(created) => {
                let id = created.id.ok_or_else(|| {
                    StoreError::Api {
                        status: 500,
                        code: None,
                        message: "store returned a query without an id".to_string(),
                    }
                })?;
                Ok((id, false))
            }
            Err(err) if err.is_popular_searches_denial() => {
                let temp_id = format!("temp_{}", self.clock.now_ms());
                warn!("Persistence denied, degrading to temporary id {temp_id}");
                metrics::counter!("guardarr_search_degraded_total").increment(1);
                Ok((temp_id, true))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn cache_results(&self, search_id: &str, response: &ProviderResponse) {
        self.cache.put(
            &format!("results:{search_id}"),
            json!(response),
            CacheSource::Provider,
            self.cost_per_call,
        );
    }

    fn cache_query_id(&self, key: &str, search_id: &str) {
        self.cache
            .put(key, json!({ "search_id": search_id }), CacheSource::Internal, 0.0);
    }

    fn cached_search_id(&self, key: &str) -> Option<String> {
        self.cache
            .get(key)?
            .get("search_id")?
            .as_str()
            .map(str::to_string)
    }

    pub async fn text_search(
        &self,
        user_id: &str,
        tier: Tier,
        input: TextSearchInput,
    ) -> Result<SearchOutcome, SearchError> {
        let mut query = sanitize_query(&input.query)?;
        if input.query_type == QueryType::Hashtag {
            query = format_hashtag(&query);
        }

        self.check_quota(user_id, tier)?;

        let params = self.merge_options(&input.options);
        let key = cache_key(input.query_type.as_str(), &query, &params);

        if let Some(search_id) = self.cached_search_id(&key) {
            debug!(search_id, "Query cache hit");
            let degraded = search_id.starts_with("temp_");
            return Ok(SearchOutcome {
                search_id,
                cached: true,
                degraded,
            });
        }

        let record = SearchQuery {
            id: None,
            user_id: user_id.to_string(),
            query_type: input.query_type,
            query_text: Some(query.clone()),
            image_url: None,
            search_params: params.clone(),
            scheduled: input.scheduled,
            schedule_interval_minutes: input.schedule_interval_minutes,
            last_run: None,
            created_at: None,
        };
        let (search_id, degraded) = self.persist_query(&record).await?;

        match self.provider.text_search(&query, &params).await {
            Ok(response) => self.cache_results(&search_id, &response),
            Err(err) if degraded => {
                // Temporary searches have no persisted record to re-run
                // from later, so a failed live call ends the flow.
                warn!("Provider call failed for temporary search: {err}");
            }
            Err(err) => warn!(search_id, "Provider call failed, id remains valid: {err}"),
        }
        if degraded {
            self.cache.put(
                &format!("query:{search_id}"),
                json!(record),
                CacheSource::Internal,
                0.0,
            );
        }

        self.cache_query_id(&key, &search_id);
        Ok(SearchOutcome {
            search_id,
            cached: false,
            degraded,
        })
    }

    pub async fn image_search(
        &self,
        user_id: &str,
        tier: Tier,
        input: ImageSearchInput,
    ) -> Result<SearchOutcome, SearchError> {
        crate::services::validation::validate_image_file(
            &input.file_name,
            &input.content_type,
            input.bytes.len() as u64,
        )?;

        self.check_quota(user_id, tier)?;

        let mut params = self.merge_options(&input.options.provider_params());
        params["similarity_threshold"] = json!(input.options.similarity_threshold);

        // The stored URL embeds an upload timestamp, so the cache keys on
        // the image bytes instead. A repeat of the same image with the same
        // options short-circuits before re-uploading.
        let fingerprint = image_fingerprint(&input.bytes);
        let key = cache_key("image", &fingerprint, &params);

        if let Some(search_id) = self.cached_search_id(&key) {
            debug!(search_id, "Image cache hit");
            let degraded = search_id.starts_with("temp_");
            return Ok(SearchOutcome {
                search_id,
                cached: true,
                degraded,
            });
        }

        let file_name = format!("{user_id}_{}_{}", self.clock.now_ms(), input.file_name);
        let image_url = self
            .store
            .upload_image(&file_name, input.bytes, &input.content_type)
            .await?;

        let record = SearchQuery {
            id: None,
            user_id: user_id.to_string(),
            query_type: QueryType::Image,
            query_text: None,
            image_url: Some(image_url.clone()),
            search_params: params.clone(),
            scheduled: false,
            schedule_interval_minutes: None,
            last_run: None,
            created_at: None,
        };
        let (search_id, degraded) = self.persist_query(&record).await?;

        let response = match self.deduped_image_call(&key, &image_url, &params).await {
            Ok(response) if response.items.as_ref().is_some_and(|i| !i.is_empty()) => {
                Some(response)
            }
            Ok(_) => Some(self.synthesized_response(&image_url, &input.options).await),
            Err(err) => {
                warn!(search_id, "Image provider call failed: {err}");
                Some(self.synthesized_response(&image_url, &input.options).await)
            }
        };

        if let Some(response) = response {
            self.cache_results(&search_id, &response);
        }
        if degraded {
            self.cache.put(
                &format!("query:{search_id}"),
                json!(record),
                CacheSource::Internal,
                0.0,
            );
        }

        self.cache_query_id(&key, &search_id);
        Ok(SearchOutcome {
            search_id,
            cached: false,
            degraded,
        })
    }

    /// Concurrent image searches for the same key share one provider call.
    async fn deduped_image_call(
        &self,
        key: &str,
        image_url: &str,
        params: &Value,
    ) -> Result<ProviderResponse, Arc<ProviderError>> {
        let call = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);

            if let Some(existing) = pending.get(key) {
                metrics::counter!("guardarr_search_deduplicated_total").increment(1);
                existing.clone()
            } else {
                let provider = Arc::clone(&self.provider);
                let image_url = image_url.to_string();
                let params = params.clone();
                let call = async move {
                    provider
                        .image_search(&image_url, &params)
                        .await
                        .map_err(Arc::new)
                }
                .boxed()
                .shared();
                pending.insert(key.to_string(), call.clone());
                call
            }
        };

        let outcome = call.await;

        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);

        outcome
    }

    /// Mock similarity candidates rendered in the provider item shape so
    /// retrieval and scoring stay uniform.
    async fn synthesized_response(
        &self,
        image_url: &str,
        options: &SimilarityOptions,
    ) -> ProviderResponse {
        let candidates = self
            .similarity
            .find_similar(image_url, options)
            .await
            .unwrap_or_default();

        let items: Vec<ProviderItem> = candidates
            .into_iter()
            .map(|c| ProviderItem {
                title: format!("Similar image on {}", c.source),
                link: c.url,
                display_link: Some(c.source),
                snippet: Some(format!("Estimated similarity {:.0}%", c.similarity * 100.0)),
                pagemap: None,
                image: Some(json!({ "thumbnailLink": c.thumbnail })),
            })
            .collect();

        ProviderResponse {
            items: Some(items),
            search_information: None,
            error: None,
        }
    }

    /// Formats results for a search id. Temporary ids re-execute the live
    /// search from the cached query; persisted ids prefer cached provider
    /// responses. Any failure degrades to the deterministic sample set.
    pub async fn results(
        &self,
        search_id: &str,
        result_limit: Option<u32>,
    ) -> Result<FormattedResults, SearchError> {
        let found_at = self.now_rfc3339();

        let mut formatted = if search_id.starts_with("temp_") {
            self.temp_results(search_id, &found_at).await
        } else {
            self.persisted_results(search_id, &found_at).await?
        };

        if let Some(limit) = result_limit {
            formatted.results.truncate(limit as usize);
        }
        Ok(formatted)
    }

    async fn temp_results(&self, search_id: &str, found_at: &str) -> FormattedResults {
        let Some(raw) = self.cache.get(&format!("query:{search_id}")) else {
            return sample_results(search_id, "your content", found_at);
        };
        let Ok(record) = serde_json::from_value::<SearchQuery>(raw) else {
            return sample_results(search_id, "your content", found_at);
        };

        let query = record.effective_query().unwrap_or_default().to_string();

        // Session-scoped searches are re-executed live, not replayed.
        let call = match record.query_type {
            QueryType::Image => {
                self.provider
                    .image_search(&query, &record.search_params)
                    .await
            }
            _ => {
                self.provider
                    .text_search(&query, &record.search_params)
                    .await
            }
        };

        match call {
            Ok(response) => {
                self.cache_results(search_id, &response);
                format_response(search_id, &query, record.query_type, &response, found_at)
            }
            Err(_) => match self.cached_response(search_id) {
                Some(response) => {
                    format_response(search_id, &query, record.query_type, &response, found_at)
                }
                None => sample_results(search_id, &query, found_at),
            },
        }
    }

    fn cached_response(&self, search_id: &str) -> Option<ProviderResponse> {
        let raw = self.cache.get(&format!("results:{search_id}"))?;
        serde_json::from_value(raw).ok()
    }

    async fn persisted_results(
        &self,
        search_id: &str,
        found_at: &str,
    ) -> Result<FormattedResults, SearchError> {
        let Some(record) = self.store.get_query(search_id).await? else {
            // Missing record is a failure case: keep the page populated.
            return Ok(sample_results(search_id, "your content", found_at));
        };

        let query = record.effective_query().unwrap_or_default().to_string();

        if let Some(response) = self.cached_response(search_id) {
            return Ok(format_response(
                search_id,
                &query,
                record.query_type,
                &response,
                found_at,
            ));
        }

        let call = match record.query_type {
            QueryType::Image => {
                self.provider
                    .image_search(&query, &record.search_params)
                    .await
            }
            _ => {
                self.provider
                    .text_search(&query, &record.search_params)
                    .await
            }
        };

        match call {
            Ok(response) => {
                self.cache_results(search_id, &response);
                Ok(format_response(
                    search_id,
                    &query,
                    record.query_type,
                    &response,
                    found_at,
                ))
            }
            Err(err) => {
                warn!(search_id, "Result fetch failed, serving samples: {err}");
                Ok(sample_results(search_id, &query, found_at))
            }
        }
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<SearchQuery>, SearchError> {
        Ok(self.store.user_queries(user_id).await?)
    }

    pub async fn delete(&self, search_id: &str, user_id: &str) -> Result<(), SearchError> {
        if self.store.delete_query(search_id, user_id).await? {
            Ok(())
        } else {
            Err(SearchError::NotFound(search_id.to_string()))
        }
    }

    /// Re-runs a persisted scheduled query and refreshes its cached
    /// results. Used by the scheduler.
    pub async fn run_scheduled(&self, record: &SearchQuery) -> Result<(), SearchError> {
        let Some(id) = record.id.as_deref() else {
            return Err(SearchError::NotFound("<missing id>".to_string()));
        };
        let query = record.effective_query().unwrap_or_default().to_string();

        let call = match record.query_type {
            QueryType::Image => {
                self.provider
                    .image_search(&query, &record.search_params)
                    .await
            }
            _ => {
                self.provider
                    .text_search(&query, &record.search_params)
                    .await
            }
        };

        match call {
            Ok(response) => self.cache_results(id, &response),
            Err(err) => warn!(id, "Scheduled search provider call failed: {err}"),
        }

        self.store.mark_run(id).await?;
        Ok(())
    }
}
