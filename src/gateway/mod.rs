//! Payment gateway boundary. The only module that knows gateway wire
//! formats; everything crosses it in integer minor units.

pub mod paystack;

pub use paystack::PaystackGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The charge may still have happened on the gateway side, so callers
    /// must leave the transaction PENDING for webhook reconciliation.
    #[error("gateway request timed out")]
    Timeout,
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway rejected the request: {0}")]
    Api(String),
    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// A reason string safe to show API callers, with wire internals stripped.
    pub fn public_reason(&self) -> String {
        match self {
            GatewayError::Timeout => "payment provider timed out".to_string(),
            GatewayError::Request(_) => "payment provider unreachable".to_string(),
            GatewayError::Api(_) | GatewayError::InvalidResponse(_) => {
                "payment provider rejected the request".to_string()
            }
        }
    }
}

/// Result of initializing a hosted-checkout charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeInit {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Success,
    Failed,
    Pending,
}

/// Reusable authorization returned with a successful card charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayAuthorization {
    pub authorization_code: String,
    pub bin: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<String>,
    pub exp_year: Option<String>,
    pub card_type: Option<String>,
    pub bank: Option<String>,
    pub customer_code: Option<String>,
    pub signature: Option<String>,
    #[serde(default)]
    pub reusable: bool,
}

#[derive(Debug, Clone)]
pub struct ChargeVerification {
    pub status: ChargeStatus,
    pub fee_minor: i64,
    pub channel: Option<String>,
    pub authorization: Option<GatewayAuthorization>,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_charge(
        &self,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: serde_json::Value,
        channels: &[String],
    ) -> Result<ChargeInit, GatewayError>;

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError>;

    async fn charge_stored_authorization(
        &self,
        authorization_code: &str,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: serde_json::Value,
    ) -> Result<ChargeVerification, GatewayError>;

    fn validate_webhook_signature(&self, signature_header: &str, raw_body: &[u8]) -> bool;
}
