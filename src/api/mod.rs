use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

mod admin;
pub mod auth;
mod error;
mod observability;
mod search;
mod subscription;
mod system;
mod types;

pub use error::ApiError;
pub use types::*;

pub fn router(state: SharedState) -> Router {
    let cors_origins = state.config.server.cors_allowed_origins.clone();

    let api_router = Router::new()
        .route("/search/text", post(search::text_search))
        .route("/search/image", post(search::image_search))
        .route("/search/history", get(search::history))
        .route("/search/{id}/results", get(search::get_results))
        .route("/search/{id}", delete(search::delete_search))
        .route("/subscription", get(subscription::get_subscription))
        .route("/checkout/verify", post(subscription::verify_checkout))
        .route("/admin/rate-limits", get(admin::rate_limit_stats))
        .route("/admin/rate-limits/clear", post(admin::clear_all_rate_limits))
        .route("/admin/rate-limits/{user}", delete(admin::clear_rate_limit))
        .route("/admin/cache/stats", get(admin::cache_stats))
        .route("/system/status", get(system::status))
        .route("/metrics", get(observability::get_metrics))
        // Must sit above the validator's 10 MB image cap.
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::resolve_identity,
        ))
        .with_state(state);

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::track_metrics))
}
