//! Order shape consumed from the external order storage collaborator.
//! This core never owns order persistence, it only reads the parties and
//! writes status transitions through the `OrderStore` seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Preparing,
    ReadyForPickup,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub driver_id: Option<String>,
    pub status: OrderStatus,
    pub last_location: Option<GeoPoint>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Everyone who must receive this order's events: buyer, seller and the
    /// assigned driver. Admin monitoring is a role group, not part of this set.
    pub fn interest_set(&self) -> Vec<String> {
        let mut set = vec![self.buyer_id.clone(), self.seller_id.clone()];
        if let Some(driver) = &self.driver_id {
            set.push(driver.clone());
        }
        set
    }
}
