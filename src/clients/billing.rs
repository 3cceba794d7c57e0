use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::BillingConfig;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Billing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Billing endpoint error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Billing verification is disabled")]
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub success: bool,

    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait CheckoutVerifier: Send + Sync {
    /// Confirms a checkout session with the billing backend on behalf of
    /// the bearer of `token`.
    async fn verify(&self, session_id: &str, token: &str) -> Result<VerifyOutcome, BillingError>;
}

pub struct HttpCheckoutVerifier {
    http: reqwest::Client,
    config: BillingConfig,
}

impl HttpCheckoutVerifier {
    pub fn new(config: BillingConfig) -> Result<Self, BillingError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl CheckoutVerifier for HttpCheckoutVerifier {
    async fn verify(&self, session_id: &str, token: &str) -> Result<VerifyOutcome, BillingError> {
        if !self.config.enabled {
            return Err(BillingError::Disabled);
        }

        debug!("Verifying checkout session");
        let response = self
            .http
            .post(&self.config.verify_endpoint)
            .bearer_auth(token)
            .json(&serde_json::json!({ "session_id": session_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BillingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}
