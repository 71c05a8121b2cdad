use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Saved, reusable charge authorization from a prior successful payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub gateway_customer_code: Option<String>,
    pub authorization_code: String,
    pub card_bin: Option<String>,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub exp_month: Option<String>,
    pub exp_year: Option<String>,
    pub bank: Option<String>,
    /// Gateway card fingerprint, used to avoid saving the same card twice.
    pub signature: Option<String>,
    pub is_default: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
