use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::clients::billing::BillingError;
use crate::clients::persistence::StoreError;
use crate::services::search::SearchError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    ValidationError(String),

    RateLimited {
        message: String,
        retry_after_seconds: u64,
    },

    StoreError(String),

    ExternalApiError { service: String, message: String },

    Unauthorized(String),

    Forbidden(String),

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::RateLimited { message, .. } => write!(f, "{message}"),
            Self::StoreError(msg) => write!(f, "Store error: {msg}"),
            Self::ExternalApiError { service, message } => {
                write!(f, "{service} error: {message}")
            }
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Self::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            Self::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::RateLimited { message, .. } => (StatusCode::TOO_MANY_REQUESTS, message.clone()),
            Self::StoreError(msg) => {
                tracing::error!("Store error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "The persistence service is unavailable".to_string(),
                )
            }
            Self::ExternalApiError { service, message } => {
                tracing::warn!("{service} API error: {message}");
                (
                    StatusCode::BAD_GATEWAY,
                    format!("{service} service is unavailable"),
                )
            }
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(message);
        let mut response = (status, Json(body)).into_response();

        if let Self::RateLimited {
            retry_after_seconds,
            ..
        } = self
            && let Ok(value) = retry_after_seconds.to_string().parse()
        {
            response.headers_mut().insert("retry-after", value);
        }

        response
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Validation(e) => Self::ValidationError(e.to_string()),
            SearchError::QuotaExceeded(decision) => Self::RateLimited {
                message: decision.denial_message(),
                retry_after_seconds: decision.retry_after_seconds.unwrap_or(0),
            },
            SearchError::Store(e) => Self::StoreError(e.to_string()),
            SearchError::NotFound(id) => Self::NotFound(format!("Search {id} not found")),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("Record not found".to_string()),
            StoreError::Unauthorized => Self::Unauthorized("Invalid or expired token".to_string()),
            other => Self::StoreError(other.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        Self::ExternalApiError {
            service: "Billing".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}
