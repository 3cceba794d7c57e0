use std::sync::Arc;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::cache::SearchCache;
use crate::clients::billing::{CheckoutVerifier, HttpCheckoutVerifier};
use crate::clients::persistence::{HttpQueryStore, MemoryQueryStore, QueryStore};
use crate::clients::provider::{GoogleSearchClient, SearchProvider};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::quota::QuotaService;
use crate::services::search::SearchService;
use crate::services::similarity::{MockSimilarityProvider, SimilarityProvider};

pub type SharedState = Arc<AppState>;

/// Everything the API handlers and background tasks share.
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<SearchCache>,
    pub quota: Arc<QuotaService>,
    pub store: Arc<dyn QueryStore>,
    pub provider: Arc<dyn SearchProvider>,
    pub search: Arc<SearchService>,
    pub verifier: Arc<dyn CheckoutVerifier>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<PrometheusHandle>,
    pub started_at_ms: u64,
}

impl AppState {
    /// Wires the production collaborators from configuration.
    pub fn from_config(config: Config, metrics: Option<PrometheusHandle>) -> Result<SharedState> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn QueryStore> = if config.persistence.enabled {
            Arc::new(HttpQueryStore::new(config.persistence.clone())?)
        } else {
            Arc::new(MemoryQueryStore::new())
        };

        let provider: Arc<dyn SearchProvider> =
            Arc::new(GoogleSearchClient::new(config.provider.clone())?);
        let similarity: Arc<dyn SimilarityProvider> =
            Arc::new(MockSimilarityProvider::new(clock.now_ms()));
        let verifier: Arc<dyn CheckoutVerifier> =
            Arc::new(HttpCheckoutVerifier::new(config.billing.clone())?);

        Ok(Self::build(
            config, store, provider, similarity, verifier, clock, metrics,
        ))
    }

    /// Assembles the state from explicit collaborators. Tests use this
    /// with the in-memory store, scripted providers, and a manual clock.
    #[must_use]
    pub fn build(
        config: Config,
        store: Arc<dyn QueryStore>,
        provider: Arc<dyn SearchProvider>,
        similarity: Arc<dyn SimilarityProvider>,
        verifier: Arc<dyn CheckoutVerifier>,
        clock: Arc<dyn Clock>,
        metrics: Option<PrometheusHandle>,
    ) -> SharedState {
        let cache = SearchCache::new(config.cache.clone(), Arc::clone(&clock));
        let quota = QuotaService::new(config.quota.clone(), Arc::clone(&clock));

        let search = SearchService::new(
            Arc::clone(&cache),
            Arc::clone(&quota),
            Arc::clone(&store),
            Arc::clone(&provider),
            similarity,
            config.provider.defaults.clone(),
            config.provider.cost_per_call,
            Arc::clone(&clock),
        );

        let started_at_ms = clock.now_ms();
        Arc::new(Self {
            config: Arc::new(config),
            cache,
            quota,
            store,
            provider,
            search,
            verifier,
            clock,
            metrics,
            started_at_ms,
        })
    }
}
