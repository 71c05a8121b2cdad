//! Escrow hold: funds reserved against an order until a release condition
//! is met. Never deleted, the rows are the audit trail.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Held,
    /// Fully disbursed, no driver share was owed.
    ReleasedToSeller,
    /// Fully disbursed including the driver share. Seller and driver amounts
    /// always release together, so this is a composite terminal state.
    ReleasedToDriver,
    Disputed,
    Refunded,
}

impl EscrowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EscrowStatus::ReleasedToSeller | EscrowStatus::ReleasedToDriver | EscrowStatus::Refunded
        )
    }
}

/// Why a hold was (or may be) disbursed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseCondition {
    Automatic,
    CustomerConfirmation,
    ManualAdmin,
    DisputeResolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub order_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub driver_id: Option<String>,
    pub total_amount: BigDecimal,
    pub seller_amount: BigDecimal,
    pub driver_amount: BigDecimal,
    pub platform_fee: BigDecimal,
    pub status: EscrowStatus,
    pub release_condition: ReleaseCondition,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub dispute_id: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied split for a new hold.
#[derive(Debug, Clone, Deserialize)]
pub struct EscrowSplit {
    pub order_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub driver_id: Option<String>,
    pub total_amount: BigDecimal,
    pub seller_amount: BigDecimal,
    pub driver_amount: BigDecimal,
    pub platform_fee: BigDecimal,
    #[serde(default = "default_release_condition")]
    pub release_condition: ReleaseCondition,
}

fn default_release_condition() -> ReleaseCondition {
    ReleaseCondition::CustomerConfirmation
}

impl EscrowSplit {
    /// A mismatched split is a caller bug, rejected before any state exists.
    pub fn validate(&self) -> Result<(), AppError> {
        let sum = &self.seller_amount + &self.driver_amount + &self.platform_fee;
        if sum != self.total_amount {
            return Err(AppError::Validation(format!(
                "split does not add up: {} + {} + {} != {}",
                self.seller_amount, self.driver_amount, self.platform_fee, self.total_amount
            )));
        }
        if self.driver_id.is_none() && self.driver_amount != BigDecimal::from(0) {
            return Err(AppError::Validation(
                "driver amount set without a driver".to_string(),
            ));
        }
        Ok(())
    }
}

impl EscrowTransaction {
    pub fn hold(transaction_id: Uuid, split: EscrowSplit) -> Result<Self, AppError> {
        split.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            transaction_id,
            order_id: split.order_id,
            buyer_id: split.buyer_id,
            seller_id: split.seller_id,
            driver_id: split.driver_id,
            total_amount: split.total_amount,
            seller_amount: split.seller_amount,
            driver_amount: split.driver_amount,
            platform_fee: split.platform_fee,
            status: EscrowStatus::Held,
            release_condition: split.release_condition,
            auto_release_at: None,
            dispute_id: None,
            released_at: None,
            resolved_by: None,
            created_at: Utc::now(),
        })
    }
}
