use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One wallet per identity. Created lazily on first access, never deleted.
/// The balance is only ever mutated through the ledger's atomic operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub owner_id: String,
    pub balance: BigDecimal,
    pub currency: String,
    pub active: bool,
    pub last_activity: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner_id: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            balance: BigDecimal::from(0),
            currency: currency.into(),
            active: true,
            last_activity: Utc::now(),
        }
    }
}
