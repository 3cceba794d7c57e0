use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::ApiError;
use crate::models::Tier;
use crate::state::SharedState;

/// Resolved caller identity, attached as a request extension by
/// [`resolve_identity`].
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,

    pub email: Option<String>,

    pub tier: Tier,
}

impl Identity {
    #[must_use]
    pub fn anonymous(client_id: &str) -> Self {
        Self {
            user_id: client_id.to_string(),
            email: None,
            tier: Tier::Anonymous,
        }
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Maps the bearer token (when present) to a user and tier. Requests
/// without a token run as the anonymous tier, keyed by `X-Client-Id` so
/// quota still tracks individual anonymous clients.
pub async fn resolve_identity(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = match bearer_token(&req) {
        Some(token) => match state.store.auth_user(token).await {
            Ok(Some(user)) => {
                let admin = user.role.as_deref() == Some("admin")
                    || state.config.quota.admin_emails.contains(&user.email);

                let tier = if admin {
                    Tier::Admin
                } else {
                    match state.store.get_subscription(&user.id).await {
                        Ok(subscription) => Tier::from_subscription(subscription.as_ref()),
                        Err(err) => {
                            warn!("Subscription lookup failed, assuming basic: {err}");
                            Tier::Basic
                        }
                    }
                };

                Identity {
                    user_id: user.id,
                    email: Some(user.email),
                    tier,
                }
            }
            Ok(None) => {
                return ApiError::Unauthorized("Invalid or expired token".to_string())
                    .into_response();
            }
            Err(err) => {
                return ApiError::from(err).into_response();
            }
        },
        None => {
            let client_id = req
                .headers()
                .get("x-client-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("anonymous");
            Identity::anonymous(client_id)
        }
    };

    req.extensions_mut().insert(identity);
    next.run(req).await
}

/// Gate for the admin routes.
pub fn require_admin(identity: &Identity) -> Result<(), ApiError> {
    if identity.tier == Tier::Admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Admin access required".to_string()))
    }
}
