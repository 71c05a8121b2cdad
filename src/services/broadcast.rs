//! Order status broadcasting: on every order/kitchen/pickup/delivery state
//! change, persist the new state, compute the interest set and push
//! role-tailored updates through the broadcast router. Owns the policy of
//! when delivery semantics trigger the escrow release path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::domain::order::GeoPoint;
use crate::domain::{EscrowStatus, Order, OrderStatus, ReleaseCondition};
use crate::error::AppError;
use crate::realtime::message::{
    DeliveryStatusPayload, MessageKind, OrderStatusPayload, PaymentSummary,
};
use crate::realtime::{BroadcastRouter, RealtimeMessage, Role};
use crate::services::escrow::EscrowEngine;

/// External order storage collaborator. This core only consumes reads and
/// status writes; everything else about orders lives outside.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, order_id: &str) -> Result<Order, AppError>;
    async fn update_order_state(
        &self,
        order_id: &str,
        status: OrderStatus,
        location: Option<GeoPoint>,
    ) -> Result<Order, AppError>;
}

/// In-memory order store used in tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, order: Order) {
        self.orders.write().await.insert(order.id.clone(), order);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_order(&self, order_id: &str) -> Result<Order, AppError> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))
    }

    async fn update_order_state(
        &self,
        order_id: &str,
        status: OrderStatus,
        location: Option<GeoPoint>,
    ) -> Result<Order, AppError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;
        order.status = status;
        if location.is_some() {
            order.last_location = location;
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub note: Option<String>,
    pub actor_id: String,
}

/// Proof references attached to pickup/delivery confirmations. References
/// only; raw binary never crosses the realtime channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProofRefs {
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub signature_ref: Option<String>,
}

pub struct OrderStatusBroadcaster {
    orders: Arc<dyn OrderStore>,
    router: Arc<BroadcastRouter>,
    escrow: Arc<EscrowEngine>,
}

impl OrderStatusBroadcaster {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        router: Arc<BroadcastRouter>,
        escrow: Arc<EscrowEngine>,
    ) -> Self {
        Self {
            orders,
            router,
            escrow,
        }
    }

    /// Full order lifecycle transition: persist, fan out, and on terminal
    /// states drive the escrow policy.
    pub async fn order_status_changed(&self, update: OrderUpdate) -> Result<Order, AppError> {
        let order = self
            .orders
            .update_order_state(&update.order_id, update.status, update.location)
            .await?;

        // Keep the router's location-fanout set current for this order.
        self.router.set_interest(&order.id, order.interest_set());

        let payment = self.payment_summary_for(&order).await;
        for identity in order.interest_set() {
            let payload = self.tailor_payload(&order, &update, &identity, payment.as_ref());
            let message = RealtimeMessage::system(MessageKind::OrderStatusUpdate(payload))
                .to(identity.clone());
            self.router.send_to_identity(&identity, message);
        }

        // Admin monitoring gets the full view.
        let admin_payload = OrderStatusPayload {
            order_id: order.id.clone(),
            status: order.status,
            eta_minutes: update.eta_minutes,
            location: order.last_location,
            note: update.note.clone(),
            payment,
        };
        self.router.send_to_role(
            Role::Admin,
            RealtimeMessage::system(MessageKind::OrderStatusUpdate(admin_payload)),
        );

        if order.status.is_terminal() {
            self.settle_escrow_for(&order, &update.actor_id).await;
            self.router.clear_interest(&order.id);
        }

        Ok(order)
    }

    /// Kitchen updates are narrower: buyer and driver only.
    pub async fn kitchen_status_changed(&self, update: OrderUpdate) -> Result<Order, AppError> {
        let order = self
            .orders
            .update_order_state(&update.order_id, update.status, None)
            .await?;

        let mut recipients = vec![order.buyer_id.clone()];
        if let Some(driver) = &order.driver_id {
            recipients.push(driver.clone());
        }
        for identity in recipients {
            let payload = OrderStatusPayload {
                order_id: order.id.clone(),
                status: order.status,
                eta_minutes: update.eta_minutes,
                location: None,
                note: update.note.clone(),
                payment: None,
            };
            let message = RealtimeMessage::system(MessageKind::OrderStatusUpdate(payload))
                .to(identity.clone());
            self.router.send_to_identity(&identity, message);
        }
        Ok(order)
    }

    /// Pickup/delivery confirmation with proof references: buyer and seller.
    pub async fn delivery_confirmation(
        &self,
        order_id: &str,
        status: OrderStatus,
        actor_id: &str,
        proof: ProofRefs,
    ) -> Result<Order, AppError> {
        let order = self
            .orders
            .update_order_state(order_id, status, None)
            .await?;

        for identity in [order.buyer_id.clone(), order.seller_id.clone()] {
            let payload = DeliveryStatusPayload {
                order_id: order.id.clone(),
                status: order.status,
                proof_photo_url: proof.photo_url.clone(),
                signature_ref: proof.signature_ref.clone(),
            };
            let message = RealtimeMessage::system(MessageKind::DeliveryStatus(payload))
                .to(identity.clone());
            self.router.send_to_identity(&identity, message);
        }

        if order.status.is_terminal() {
            self.settle_escrow_for(&order, actor_id).await;
            self.router.clear_interest(&order.id);
        }
        Ok(order)
    }

    async fn payment_summary_for(&self, order: &Order) -> Option<PaymentSummary> {
        let escrow = self.escrow.get_by_order(&order.id).await?;
        Some(PaymentSummary {
            reference: escrow.transaction_id.to_string(),
            amount: escrow.total_amount,
            currency: self.escrow.currency().to_string(),
            status: format!("{:?}", escrow.status),
        })
    }

    fn tailor_payload(
        &self,
        order: &Order,
        update: &OrderUpdate,
        identity: &str,
        payment: Option<&PaymentSummary>,
    ) -> OrderStatusPayload {
        let is_buyer = identity == order.buyer_id;
        let is_driver = order.driver_id.as_deref() == Some(identity);
        OrderStatusPayload {
            order_id: order.id.clone(),
            status: order.status,
            // ETA and live location matter to the buyer; the driver knows
            // where they are.
            eta_minutes: if is_driver { None } else { update.eta_minutes },
            location: if is_driver { None } else { order.last_location },
            note: update.note.clone(),
            // Payment details never go to the driver.
            payment: if is_buyer { payment.cloned() } else { None },
        }
    }

    /// Terminal-state escrow policy: delivery releases holds whose condition
    /// allows it, cancellation refunds the buyer. State conflicts mean the
    /// money already moved, which is fine and only logged.
    async fn settle_escrow_for(&self, order: &Order, actor_id: &str) {
        let Some(escrow) = self.escrow.get_by_order(&order.id).await else {
            return;
        };

        match order.status {
            OrderStatus::Delivered => {
                if !matches!(
                    escrow.release_condition,
                    ReleaseCondition::CustomerConfirmation | ReleaseCondition::Automatic
                ) {
                    tracing::debug!(
                        escrow = %escrow.id,
                        condition = ?escrow.release_condition,
                        "delivery does not auto-trigger this release condition"
                    );
                    return;
                }
                match self
                    .escrow
                    .release(escrow.id, escrow.release_condition, Some(actor_id.to_string()))
                    .await
                {
                    Ok(_) => {}
                    Err(AppError::InvalidState(detail)) => {
                        tracing::debug!(escrow = %escrow.id, detail, "escrow already settled");
                    }
                    Err(err) => {
                        tracing::error!(escrow = %escrow.id, error = %err, "escrow release failed");
                    }
                }
            }
            OrderStatus::Cancelled => {
                if escrow.status != EscrowStatus::Held {
                    return;
                }
                if let Err(err) = self.escrow.refund(escrow.id, Some(actor_id.to_string())).await {
                    match err {
                        AppError::InvalidState(detail) => {
                            tracing::debug!(escrow = %escrow.id, detail, "escrow already settled");
                        }
                        other => {
                            tracing::error!(escrow = %escrow.id, error = %other, "escrow refund failed");
                        }
                    }
                }
            }
            _ => {}
        }
    }
}
