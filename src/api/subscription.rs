use axum::{
    Extension, Json,
    extract::State,
};
use axum::http::HeaderMap;

use super::auth::Identity;
use super::{ApiError, ApiResponse, VerifyCheckoutRequest};
use crate::clients::billing::VerifyOutcome;
use crate::models::{Subscription, Tier};
use crate::state::SharedState;

pub async fn get_subscription(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<Option<Subscription>>>, ApiError> {
    if identity.tier == Tier::Anonymous {
        return Err(ApiError::Unauthorized(
            "Sign in to view subscription details".to_string(),
        ));
    }

    let subscription = state.store.get_subscription(&identity.user_id).await?;
    Ok(Json(ApiResponse::success(subscription)))
}

pub async fn verify_checkout(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(request): Json<VerifyCheckoutRequest>,
) -> Result<Json<ApiResponse<VerifyOutcome>>, ApiError> {
    if identity.tier == Tier::Anonymous {
        return Err(ApiError::Unauthorized(
            "Sign in to verify a checkout session".to_string(),
        ));
    }

    // The verifier acts on behalf of the caller, so their token is
    // forwarded rather than a service credential.
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let outcome = state.verifier.verify(&request.session_id, token).await?;
    Ok(Json(ApiResponse::success(outcome)))
}
