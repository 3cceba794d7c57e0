use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
};
use serde::Serialize;

use super::auth::Identity;
use super::{ApiError, ApiResponse, ResultsQuery, TextSearchRequest};
use crate::models::{FoundResult, SearchQuery, Tier};
use crate::services::search::{ImageSearchInput, SearchOutcome, TextSearchInput};
use crate::services::similarity::SimilarityOptions;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct PagedResults {
    pub search_id: String,
    pub results: Vec<FoundResult>,
    pub total_results: usize,
    pub page: usize,
    pub page_size: usize,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

pub async fn text_search(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<TextSearchRequest>,
) -> Result<Json<ApiResponse<SearchOutcome>>, ApiError> {
    let outcome = state
        .search
        .text_search(
            &identity.user_id,
            identity.tier,
            TextSearchInput {
                query_type: request.query_type,
                query: request.query,
                options: request.options,
                scheduled: request.scheduled,
                schedule_interval_minutes: request.schedule_interval_minutes,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn image_search(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<SearchOutcome>>, ApiError> {
    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut options = SimilarityOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::ValidationError(e.to_string()))?
    {
        match field.name() {
            Some("image") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::ValidationError(e.to_string()))?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            Some("options") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::ValidationError(e.to_string()))?;
                options = serde_json::from_str(&raw)
                    .map_err(|e| ApiError::ValidationError(format!("Invalid options: {e}")))?;
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| ApiError::ValidationError("Missing image field".to_string()))?;

    let outcome = state
        .search
        .image_search(
            &identity.user_id,
            identity.tier,
            ImageSearchInput {
                file_name,
                content_type,
                bytes,
                options,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(outcome)))
}

/// Result visibility cap: the plan's `result_limit` for subscribers, the
/// configured default for everyone else, uncapped for admins.
async fn result_limit(state: &SharedState, identity: &Identity) -> Option<u32> {
    if identity.tier == Tier::Admin {
        return None;
    }

    match state.store.get_subscription(&identity.user_id).await {
        Ok(Some(subscription)) if subscription.is_active() => Some(subscription.plan.result_limit),
        _ => u32::try_from(state.config.provider.defaults.max_results).ok(),
    }
}

pub async fn get_results(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(search_id): Path<String>,
    Query(paging): Query<ResultsQuery>,
) -> Result<Json<ApiResponse<PagedResults>>, ApiError> {
    let limit = result_limit(&state, &identity).await;
    let formatted = state.search.results(&search_id, limit).await?;

    let page = paging.page.max(1);
    let page_size = paging.page_size.clamp(1, 100);
    let results: Vec<FoundResult> = formatted
        .results
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    Ok(Json(ApiResponse::success(PagedResults {
        search_id: formatted.search_id,
        results,
        total_results: formatted.total_results,
        page,
        page_size,
        fallback: formatted.fallback,
        notice: formatted.notice,
    })))
}

pub async fn history(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<Vec<SearchQuery>>>, ApiError> {
    let queries = state.search.history(&identity.user_id).await?;
    Ok(Json(ApiResponse::success(queries)))
}

pub async fn delete_search(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(search_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.search.delete(&search_id, &identity.user_id).await?;
    Ok(Json(ApiResponse::success(())))
}
