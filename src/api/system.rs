use axum::{Json, extract::State};

use super::{ApiResponse, SystemStatusDto};
use crate::state::SharedState;

pub async fn status(State(state): State<SharedState>) -> Json<ApiResponse<SystemStatusDto>> {
    let uptime_seconds = state
        .clock
        .now_ms()
        .saturating_sub(state.started_at_ms)
        / 1000;

    Json(ApiResponse::success(SystemStatusDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        cache_entries: state.cache.len(),
        tracked_users: state.quota.stats().tracked_users,
        scheduler_enabled: state.config.scheduler.enabled,
        persistence_enabled: state.config.persistence.enabled,
    }))
}
