pub mod broadcast;
pub mod escrow;
pub mod notify;
pub mod transaction;

pub use broadcast::{InMemoryOrderStore, OrderStatusBroadcaster, OrderStore, OrderUpdate};
pub use escrow::EscrowEngine;
pub use notify::{NotificationSink, PaymentNotice, TracingNotifier};
pub use transaction::TransactionService;
