pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ledger;
pub mod realtime;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};

use crate::gateway::PaymentGateway;
use crate::ledger::Ledger;
use crate::realtime::{BroadcastRouter, ConnectionRegistry};
use crate::services::{
    EscrowEngine, NotificationSink, OrderStatusBroadcaster, OrderStore, TransactionService,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub escrow: Arc<EscrowEngine>,
    pub transactions: Arc<TransactionService>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<BroadcastRouter>,
    pub broadcaster: Arc<OrderStatusBroadcaster>,
    pub heartbeat_interval: Duration,
}

impl AppState {
    /// Wires the full engine graph. Collaborators behind traits (gateway,
    /// order storage, notification sinks) are injected, never reached for
    /// through ambient globals.
    pub fn build(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderStore>,
        notifier: Arc<dyn NotificationSink>,
        config: &config::Config,
    ) -> Self {
        let ledger = Arc::new(Ledger::new(config.currency.clone()));
        let registry = Arc::new(ConnectionRegistry::new(config.idle_timeout));
        let router = Arc::new(BroadcastRouter::new(registry.clone()));
        let escrow = Arc::new(EscrowEngine::new(ledger.clone(), notifier.clone()));
        let transactions = Arc::new(TransactionService::new(
            ledger.clone(),
            gateway.clone(),
            escrow.clone(),
            router.clone(),
            notifier,
            config.escrow_auto_release,
        ));
        let broadcaster = Arc::new(OrderStatusBroadcaster::new(
            orders,
            router.clone(),
            escrow.clone(),
        ));

        Self {
            ledger,
            gateway,
            escrow,
            transactions,
            registry,
            router,
            broadcaster,
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    /// Starts the idle-connection sweep and the escrow auto-release sweep.
    pub fn spawn_background_tasks(&self, config: &config::Config) {
        tokio::spawn(self.registry.clone().run_sweep(config.sweep_interval));
        tokio::spawn(
            self.escrow
                .clone()
                .run_auto_release_sweep(config.escrow_sweep_interval),
        );
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(handlers::ws::ws_handler))
        .route("/payments/initialize", post(handlers::payments::initialize_payment))
        .route("/payments/verify/:reference", get(handlers::payments::verify_payment))
        .route("/payments/charge-method", post(handlers::payments::charge_payment_method))
        .route("/wallet/transfer", post(handlers::payments::transfer))
        .route("/wallets/:owner_id", get(handlers::payments::get_wallet))
        .route("/transactions/:owner_id", get(handlers::payments::list_transactions))
        .route("/escrows/:id/release", post(handlers::escrows::release))
        .route("/escrows/:id/dispute", post(handlers::escrows::dispute))
        .route("/escrows/:id/refund", post(handlers::escrows::refund))
        .route(
            "/escrows/by-transaction/:transaction_id",
            get(handlers::escrows::get_by_transaction),
        )
        .route("/orders/:id/status", post(handlers::orders::update_status))
        .route("/orders/:id/kitchen", post(handlers::orders::update_kitchen_status))
        .route(
            "/orders/:id/delivery-confirmation",
            post(handlers::orders::delivery_confirmation),
        )
        .route("/webhook/gateway", post(handlers::webhook::gateway_webhook))
        .with_state(state)
}
