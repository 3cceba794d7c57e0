use axum::{
    Extension, Json,
    extract::{Path, State},
};

use super::auth::{Identity, require_admin};
use super::{ApiError, ApiResponse};
use crate::cache::CacheStats;
use crate::quota::QuotaStats;
use crate::state::SharedState;

pub async fn rate_limit_stats(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<QuotaStats>>, ApiError> {
    require_admin(&identity)?;
    Ok(Json(ApiResponse::success(state.quota.stats())))
}

pub async fn clear_rate_limit(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_admin(&identity)?;

    if state.quota.clear_user(&user_id) {
        Ok(Json(ApiResponse::success(())))
    } else {
        Err(ApiError::NotFound(format!(
            "No rate-limit record for {user_id}"
        )))
    }
}

pub async fn clear_all_rate_limits(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_admin(&identity)?;
    state.quota.clear_all();
    Ok(Json(ApiResponse::success(())))
}

pub async fn cache_stats(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<CacheStats>>, ApiError> {
    require_admin(&identity)?;
    Ok(Json(ApiResponse::success(state.cache.stats())))
}
