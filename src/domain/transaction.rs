//! Transaction domain entity: immutable intent plus a monotonic status.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
    Refund,
    EscrowRelease,
    TollPayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl TransactionStatus {
    /// SUCCESS and FAILED are terminal; the status never reverts.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: String,
    pub recipient_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    pub net_amount: BigDecimal,
    pub currency: String,
    pub gateway_reference: Option<String>,
    pub order_id: Option<String>,
    pub payment_method_id: Option<Uuid>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// New PENDING transaction. Fee is unknown until gateway verification,
    /// so net amount starts equal to the gross amount.
    pub fn new(owner_id: impl Into<String>, kind: TransactionType, amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            recipient_id: None,
            kind,
            status: TransactionStatus::Pending,
            net_amount: amount.clone(),
            amount,
            fee: BigDecimal::from(0),
            currency: currency.into(),
            gateway_reference: None,
            order_id: None,
            payment_method_id: None,
            description: None,
            metadata: None,
            initiated_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.gateway_reference = Some(reference.into());
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
