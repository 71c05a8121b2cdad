//! Realtime wire protocol. One concrete payload shape per message type,
//! validated by serde at the transport boundary; unknown types fail to
//! parse and are dropped there.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::GeoPoint;
use crate::domain::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Consumer,
    Merchant,
    Driver,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub order_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

/// Summary attached to buyer-facing order updates. Drivers never see this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusPayload {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
}

/// Pickup/delivery confirmation. Proof is carried as references only,
/// never raw binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusPayload {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmationPayload {
    pub transaction_id: Uuid,
    pub reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Chat(ChatPayload),
    LocationUpdate(LocationPayload),
    OrderStatusUpdate(OrderStatusPayload),
    Notification(NotificationPayload),
    DeliveryStatus(DeliveryStatusPayload),
    PaymentConfirmation(PaymentConfirmationPayload),
    ConnectionAck(ConnectionAckPayload),
    Error(ErrorPayload),
}

/// Transport envelope for every realtime frame. Ephemeral: the state changes
/// it reports are already persisted by their owning services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMessage {
    #[serde(flatten)]
    pub kind: MessageKind,
    pub sender_id: String,
    pub sender_role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_role: Option<Role>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl RealtimeMessage {
    pub fn new(kind: MessageKind, sender_id: impl Into<String>, sender_role: Role) -> Self {
        Self {
            kind,
            sender_id: sender_id.into(),
            sender_role,
            recipient_id: None,
            recipient_role: None,
            timestamp: Utc::now(),
        }
    }

    pub fn to(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    pub fn to_role(mut self, role: Role) -> Self {
        self.recipient_role = Some(role);
        self
    }

    /// Messages emitted by the platform itself rather than a connected user.
    pub fn system(kind: MessageKind) -> Self {
        Self::new(kind, "system", Role::Admin)
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            MessageKind::Chat(_) => "CHAT",
            MessageKind::LocationUpdate(_) => "LOCATION_UPDATE",
            MessageKind::OrderStatusUpdate(_) => "ORDER_STATUS_UPDATE",
            MessageKind::Notification(_) => "NOTIFICATION",
            MessageKind::DeliveryStatus(_) => "DELIVERY_STATUS",
            MessageKind::PaymentConfirmation(_) => "PAYMENT_CONFIRMATION",
            MessageKind::ConnectionAck(_) => "CONNECTION_ACK",
            MessageKind::Error(_) => "ERROR",
        }
    }
}
