//! Broadcast router: classifies inbound realtime messages and fans them out
//! through the connection registry. Delivery is best-effort, at-most-once;
//! offline recipients are an expected steady-state condition, never an error.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::message::{ConnectionAckPayload, MessageKind, RealtimeMessage, Role};
use super::registry::ConnectionRegistry;

pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    /// Order id -> identities currently interested in its location stream.
    /// Supplied by the order status broadcasting service, not computed here.
    interest: Mutex<HashMap<String, HashSet<String>>>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            interest: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn set_interest(&self, order_id: &str, identities: impl IntoIterator<Item = String>) {
        let mut interest = self.interest.lock().expect("interest mutex poisoned");
        interest.insert(order_id.to_string(), identities.into_iter().collect());
    }

    pub fn clear_interest(&self, order_id: &str) {
        let mut interest = self.interest.lock().expect("interest mutex poisoned");
        interest.remove(order_id);
    }

    /// Dispatches one inbound frame. Senders unknown to the registry are
    /// dropped outright; their connection died or never authenticated.
    pub fn route(&self, message: RealtimeMessage) {
        if !self.registry.touch(&message.sender_id) {
            tracing::warn!(
                sender = %message.sender_id,
                kind = message.type_name(),
                "dropping message from unregistered sender"
            );
            return;
        }

        match &message.kind {
            MessageKind::ConnectionAck(_) => {
                // Registration happened at the transport handshake, which owns
                // the socket. Answer with an acknowledgment envelope.
                let ack = RealtimeMessage::system(MessageKind::ConnectionAck(
                    ConnectionAckPayload {
                        connection_id: None,
                        message: Some("connected".to_string()),
                    },
                ))
                .to(message.sender_id.clone());
                self.send_to_identity(&message.sender_id.clone(), ack);
            }
            MessageKind::LocationUpdate(payload) => {
                let recipients: Vec<String> = {
                    let interest = self.interest.lock().expect("interest mutex poisoned");
                    interest
                        .get(&payload.order_id)
                        .map(|set| {
                            set.iter()
                                .filter(|id| **id != message.sender_id)
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default()
                };
                if recipients.is_empty() {
                    tracing::debug!(order = %payload.order_id, "no interest set for location update");
                }
                for recipient in recipients {
                    self.send_to_identity(&recipient, message.clone().to(recipient.clone()));
                }
            }
            MessageKind::Chat(_)
            | MessageKind::OrderStatusUpdate(_)
            | MessageKind::Notification(_)
            | MessageKind::DeliveryStatus(_)
            | MessageKind::PaymentConfirmation(_) => match message.recipient_id.clone() {
                Some(recipient) => {
                    if !self.send_to_identity(&recipient, message) {
                        tracing::debug!(
                            recipient = %recipient,
                            "recipient offline, message dropped"
                        );
                    }
                }
                None => {
                    tracing::warn!(
                        kind = message.type_name(),
                        sender = %message.sender_id,
                        "direct message without recipient dropped"
                    );
                }
            },
            MessageKind::Error(payload) => {
                tracing::warn!(
                    sender = %message.sender_id,
                    error = %payload.message,
                    "client reported error"
                );
            }
        }
    }

    /// Returns false when the recipient is offline or its queue just closed.
    pub fn send_to_identity(&self, identity_id: &str, message: RealtimeMessage) -> bool {
        match self.registry.sender_for(identity_id) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Delivers to every live connection with the role. The returned count is
    /// for observability, not a receipt guarantee.
    pub fn send_to_role(&self, role: Role, message: RealtimeMessage) -> usize {
        let mut delivered = 0;
        for sender in self.registry.senders_by_role(role) {
            if sender.send(message.clone().to_role(role)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
