//! Escrow engine: hold/release state machine over the wallet ledger.
//!
//! The engine knows HELD/RELEASED/DISPUTED/REFUNDED, nothing about delivery
//! semantics; the order status broadcaster owns that policy. Status
//! transitions happen under the escrow table's write guard, which is what
//! makes `release` idempotent when the manual path and the auto-release
//! sweep fire near-simultaneously. The guard is short-lived: ledger credits
//! and notification I/O always run after it drops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    escrow::EscrowSplit, EscrowStatus, EscrowTransaction, ReleaseCondition, Transaction,
    TransactionType,
};
use crate::error::AppError;
use crate::ledger::Ledger;
use crate::services::notify::{notify_best_effort, NotificationSink, PaymentNotice};

#[derive(Default)]
struct EscrowTable {
    escrows: HashMap<Uuid, EscrowTransaction>,
    by_transaction: HashMap<Uuid, Uuid>,
    by_order: HashMap<String, Uuid>,
}

pub struct EscrowEngine {
    ledger: Arc<Ledger>,
    notifier: Arc<dyn NotificationSink>,
    table: RwLock<EscrowTable>,
}

impl EscrowEngine {
    pub fn new(ledger: Arc<Ledger>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            ledger,
            notifier,
            table: RwLock::new(EscrowTable::default()),
        }
    }

    pub fn currency(&self) -> &str {
        self.ledger.currency()
    }

    /// Creates a HELD escrow from a validated split. A mismatched split is a
    /// caller bug and is rejected before any state exists.
    pub async fn hold(
        &self,
        transaction_id: Uuid,
        split: EscrowSplit,
    ) -> Result<EscrowTransaction, AppError> {
        let escrow = EscrowTransaction::hold(transaction_id, split)?;
        let mut table = self.table.write().await;
        table.by_transaction.insert(transaction_id, escrow.id);
        table.by_order.insert(escrow.order_id.clone(), escrow.id);
        table.escrows.insert(escrow.id, escrow.clone());
        tracing::info!(
            escrow = %escrow.id,
            order = %escrow.order_id,
            total = %escrow.total_amount,
            "escrow hold created"
        );
        Ok(escrow)
    }

    /// Arms the auto-release timer. Called once payment is confirmed; unpaid
    /// holds never auto-release.
    pub async fn schedule_auto_release(
        &self,
        escrow_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut table = self.table.write().await;
        let escrow = table
            .escrows
            .get_mut(&escrow_id)
            .ok_or_else(|| AppError::NotFound(format!("escrow {}", escrow_id)))?;
        if escrow.status != EscrowStatus::Held {
            return Err(AppError::InvalidState(format!(
                "escrow {} is {:?}, cannot schedule auto-release",
                escrow_id, escrow.status
            )));
        }
        escrow.auto_release_at = Some(at);
        Ok(())
    }

    /// Disburses the held funds: seller and driver shares always release
    /// together. Allowed from HELD, or from DISPUTED only as a dispute
    /// resolution. Exactly one caller wins; later callers get InvalidState.
    pub async fn release(
        &self,
        escrow_id: Uuid,
        condition: ReleaseCondition,
        released_by: Option<String>,
    ) -> Result<EscrowTransaction, AppError> {
        // Reserve the win under the guard: flip to the terminal status first,
        // so a concurrent caller observes non-HELD immediately. The ledger
        // credits and the notification I/O run after the guard drops; only
        // the status flip needs the lock, not the disbursement.
        let zero = bigdecimal::BigDecimal::from(0);
        let escrow = {
            let mut table = self.table.write().await;
            let escrow = table
                .escrows
                .get_mut(&escrow_id)
                .ok_or_else(|| AppError::NotFound(format!("escrow {}", escrow_id)))?;

            match (escrow.status, condition) {
                (EscrowStatus::Held, _) => {}
                (EscrowStatus::Disputed, ReleaseCondition::DisputeResolution) => {}
                (status, _) => {
                    return Err(AppError::InvalidState(format!(
                        "escrow {} is {:?}, release refused",
                        escrow_id, status
                    )));
                }
            }

            let driver_share =
                escrow.driver_id.is_some() && escrow.driver_amount > zero;
            escrow.status = if driver_share {
                EscrowStatus::ReleasedToDriver
            } else {
                EscrowStatus::ReleasedToSeller
            };
            escrow.release_condition = condition;
            escrow.released_at = Some(Utc::now());
            escrow.resolved_by = released_by;
            escrow.clone()
        };

        if escrow.seller_amount > zero {
            let txn = Transaction::new(
                escrow.seller_id.clone(),
                TransactionType::EscrowRelease,
                escrow.seller_amount.clone(),
                self.ledger.currency(),
            )
            .with_order(escrow.order_id.clone())
            .with_description(format!("escrow release for order {}", escrow.order_id));
            let recorded = self
                .ledger
                .credit_with_record(&escrow.seller_id, &escrow.seller_amount, txn)
                .await?;
            notify_best_effort(
                self.notifier.as_ref(),
                PaymentNotice {
                    identity_id: escrow.seller_id.clone(),
                    transaction_id: recorded.id,
                    title: "Funds released".to_string(),
                    body: format!("Order {} payout released to your wallet", escrow.order_id),
                    amount: escrow.seller_amount.clone(),
                },
            )
            .await;
        }

        if let Some(driver_id) = escrow.driver_id.clone() {
            if escrow.driver_amount > zero {
                let txn = Transaction::new(
                    driver_id.clone(),
                    TransactionType::EscrowRelease,
                    escrow.driver_amount.clone(),
                    self.ledger.currency(),
                )
                .with_order(escrow.order_id.clone())
                .with_description(format!("delivery payout for order {}", escrow.order_id));
                let recorded = self
                    .ledger
                    .credit_with_record(&driver_id, &escrow.driver_amount, txn)
                    .await?;
                notify_best_effort(
                    self.notifier.as_ref(),
                    PaymentNotice {
                        identity_id: driver_id,
                        transaction_id: recorded.id,
                        title: "Delivery payout".to_string(),
                        body: format!("Payout for order {} released", escrow.order_id),
                        amount: escrow.driver_amount.clone(),
                    },
                )
                .await;
            }
        }

        tracing::info!(
            escrow = %escrow.id,
            order = %escrow.order_id,
            status = ?escrow.status,
            condition = ?condition,
            "escrow released"
        );
        Ok(escrow)
    }

    /// HELD -> DISPUTED. Freezes the hold until a dispute-resolution release
    /// or a refund.
    pub async fn dispute(
        &self,
        escrow_id: Uuid,
        dispute_id: impl Into<String>,
    ) -> Result<EscrowTransaction, AppError> {
        let mut table = self.table.write().await;
        let escrow = table
            .escrows
            .get_mut(&escrow_id)
            .ok_or_else(|| AppError::NotFound(format!("escrow {}", escrow_id)))?;
        if escrow.status != EscrowStatus::Held {
            return Err(AppError::InvalidState(format!(
                "escrow {} is {:?}, cannot dispute",
                escrow_id, escrow.status
            )));
        }
        escrow.status = EscrowStatus::Disputed;
        escrow.dispute_id = Some(dispute_id.into());
        tracing::warn!(escrow = %escrow.id, order = %escrow.order_id, "escrow disputed");
        Ok(escrow.clone())
    }

    /// Returns the full held amount to the buyer. Allowed from HELD or
    /// DISPUTED.
    pub async fn refund(
        &self,
        escrow_id: Uuid,
        resolved_by: Option<String>,
    ) -> Result<EscrowTransaction, AppError> {
        // Same discipline as `release`: claim REFUNDED under the guard, then
        // credit and notify without it.
        let escrow = {
            let mut table = self.table.write().await;
            let escrow = table
                .escrows
                .get_mut(&escrow_id)
                .ok_or_else(|| AppError::NotFound(format!("escrow {}", escrow_id)))?;
            if !matches!(escrow.status, EscrowStatus::Held | EscrowStatus::Disputed) {
                return Err(AppError::InvalidState(format!(
                    "escrow {} is {:?}, cannot refund",
                    escrow_id, escrow.status
                )));
            }
            escrow.status = EscrowStatus::Refunded;
            escrow.released_at = Some(Utc::now());
            escrow.resolved_by = resolved_by;
            escrow.clone()
        };

        let txn = Transaction::new(
            escrow.buyer_id.clone(),
            TransactionType::Refund,
            escrow.total_amount.clone(),
            self.ledger.currency(),
        )
        .with_order(escrow.order_id.clone())
        .with_description(format!("refund for order {}", escrow.order_id));
        let recorded = self
            .ledger
            .credit_with_record(&escrow.buyer_id, &escrow.total_amount, txn)
            .await?;

        notify_best_effort(
            self.notifier.as_ref(),
            PaymentNotice {
                identity_id: escrow.buyer_id.clone(),
                transaction_id: recorded.id,
                title: "Refund issued".to_string(),
                body: format!("Order {} was refunded to your wallet", escrow.order_id),
                amount: escrow.total_amount.clone(),
            },
        )
        .await;

        tracing::info!(escrow = %escrow.id, order = %escrow.order_id, "escrow refunded");
        Ok(escrow)
    }

    pub async fn get(&self, escrow_id: Uuid) -> Result<EscrowTransaction, AppError> {
        let table = self.table.read().await;
        table
            .escrows
            .get(&escrow_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("escrow {}", escrow_id)))
    }

    pub async fn get_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<EscrowTransaction, AppError> {
        let table = self.table.read().await;
        table
            .by_transaction
            .get(&transaction_id)
            .and_then(|id| table.escrows.get(id))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("escrow for transaction {}", transaction_id))
            })
    }

    pub async fn get_by_order(&self, order_id: &str) -> Option<EscrowTransaction> {
        let table = self.table.read().await;
        table
            .by_order
            .get(order_id)
            .and_then(|id| table.escrows.get(id))
            .cloned()
    }

    /// One pass of the auto-release sweep: releases every HELD escrow whose
    /// timer has elapsed. Losing the race against a manual release is normal
    /// and only logged.
    pub async fn auto_release_due(&self) -> usize {
        let now = Utc::now();
        let due: Vec<Uuid> = {
            let table = self.table.read().await;
            table
                .escrows
                .values()
                .filter(|e| {
                    e.status == EscrowStatus::Held
                        && e.auto_release_at.map(|at| at <= now).unwrap_or(false)
                })
                .map(|e| e.id)
                .collect()
        };

        let mut released = 0;
        for escrow_id in due {
            match self.release(escrow_id, ReleaseCondition::Automatic, None).await {
                Ok(_) => released += 1,
                Err(AppError::InvalidState(detail)) => {
                    tracing::debug!(escrow = %escrow_id, detail, "auto-release lost the race");
                }
                Err(err) => {
                    tracing::error!(escrow = %escrow_id, error = %err, "auto-release failed");
                }
            }
        }
        released
    }

    /// Background sweep on a fixed interval, independent of request traffic.
    pub async fn run_auto_release_sweep(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let released = self.auto_release_due().await;
            if released > 0 {
                tracing::info!(released, "auto-release sweep disbursed escrows");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notify::TracingNotifier;
    use bigdecimal::BigDecimal;

    fn engine() -> (Arc<Ledger>, EscrowEngine) {
        let ledger = Arc::new(Ledger::new("NGN"));
        let engine = EscrowEngine::new(ledger.clone(), Arc::new(TracingNotifier));
        (ledger, engine)
    }

    fn split() -> EscrowSplit {
        EscrowSplit {
            order_id: "order-1".to_string(),
            buyer_id: "buyer-1".to_string(),
            seller_id: "seller-1".to_string(),
            driver_id: Some("driver-1".to_string()),
            total_amount: BigDecimal::from(15_000),
            seller_amount: BigDecimal::from(12_000),
            driver_amount: BigDecimal::from(2_000),
            platform_fee: BigDecimal::from(1_000),
            release_condition: ReleaseCondition::CustomerConfirmation,
        }
    }

    #[tokio::test]
    async fn release_credits_both_parties() {
        let (ledger, engine) = engine();
        let escrow = engine.hold(Uuid::new_v4(), split()).await.unwrap();

        let released = engine
            .release(escrow.id, ReleaseCondition::CustomerConfirmation, None)
            .await
            .unwrap();

        assert_eq!(released.status, EscrowStatus::ReleasedToDriver);
        assert!(released.released_at.is_some());
        assert_eq!(
            ledger.get_or_create_wallet("seller-1").await.balance,
            BigDecimal::from(12_000)
        );
        assert_eq!(
            ledger.get_or_create_wallet("driver-1").await.balance,
            BigDecimal::from(2_000)
        );
        // One ESCROW_RELEASE row per credited party.
        assert_eq!(ledger.list_transactions("seller-1", 10).await.len(), 1);
        assert_eq!(ledger.list_transactions("driver-1", 10).await.len(), 1);
    }

    #[tokio::test]
    async fn release_without_driver_share_is_seller_terminal() {
        let (_ledger, engine) = engine();
        let mut s = split();
        s.driver_id = None;
        s.driver_amount = BigDecimal::from(0);
        s.seller_amount = BigDecimal::from(14_000);
        let escrow = engine.hold(Uuid::new_v4(), s).await.unwrap();

        let released = engine
            .release(escrow.id, ReleaseCondition::ManualAdmin, Some("admin-1".to_string()))
            .await
            .unwrap();
        assert_eq!(released.status, EscrowStatus::ReleasedToSeller);
        assert_eq!(released.resolved_by.as_deref(), Some("admin-1"));
    }

    #[tokio::test]
    async fn double_release_succeeds_exactly_once() {
        let (ledger, engine) = engine();
        let escrow = engine.hold(Uuid::new_v4(), split()).await.unwrap();

        engine
            .release(escrow.id, ReleaseCondition::CustomerConfirmation, None)
            .await
            .unwrap();
        let err = engine
            .release(escrow.id, ReleaseCondition::Automatic, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidState(_)));
        // No additional credit.
        assert_eq!(
            ledger.get_or_create_wallet("seller-1").await.balance,
            BigDecimal::from(12_000)
        );
    }

    #[tokio::test]
    async fn concurrent_release_has_one_winner() {
        let (ledger, engine) = engine();
        let engine = Arc::new(engine);
        let escrow = engine.hold(Uuid::new_v4(), split()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let id = escrow.id;
            handles.push(tokio::spawn(async move {
                engine
                    .release(id, ReleaseCondition::CustomerConfirmation, None)
                    .await
                    .is_ok()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(
            ledger.get_or_create_wallet("seller-1").await.balance,
            BigDecimal::from(12_000)
        );
    }

    #[tokio::test]
    async fn disputed_escrow_only_releases_via_dispute_resolution() {
        let (_ledger, engine) = engine();
        let escrow = engine.hold(Uuid::new_v4(), split()).await.unwrap();
        engine.dispute(escrow.id, "dispute-1").await.unwrap();

        let err = engine
            .release(escrow.id, ReleaseCondition::CustomerConfirmation, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let released = engine
            .release(
                escrow.id,
                ReleaseCondition::DisputeResolution,
                Some("admin-9".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(released.status, EscrowStatus::ReleasedToDriver);
    }

    #[tokio::test]
    async fn refund_returns_total_to_buyer() {
        let (ledger, engine) = engine();
        let escrow = engine.hold(Uuid::new_v4(), split()).await.unwrap();
        engine.dispute(escrow.id, "dispute-2").await.unwrap();

        let refunded = engine.refund(escrow.id, Some("admin-1".to_string())).await.unwrap();
        assert_eq!(refunded.status, EscrowStatus::Refunded);
        assert_eq!(
            ledger.get_or_create_wallet("buyer-1").await.balance,
            BigDecimal::from(15_000)
        );

        // Terminal: neither refund nor dispute can re-enter.
        assert!(engine.refund(escrow.id, None).await.is_err());
        assert!(engine.dispute(escrow.id, "again").await.is_err());
    }

    struct GatedNotifier {
        entered: Arc<tokio::sync::Notify>,
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl crate::services::notify::NotificationSink for GatedNotifier {
        async fn send_payment_notification(&self, _notice: PaymentNotice) -> anyhow::Result<()> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_notifications_do_not_block_other_escrow_operations() {
        let ledger = Arc::new(Ledger::new("NGN"));
        let entered = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::new(tokio::sync::Notify::new());
        let engine = Arc::new(EscrowEngine::new(
            ledger.clone(),
            Arc::new(GatedNotifier {
                entered: entered.clone(),
                gate: gate.clone(),
            }),
        ));

        let released = engine.hold(Uuid::new_v4(), split()).await.unwrap();
        let mut other = split();
        other.order_id = "order-2".to_string();
        let unrelated = engine.hold(Uuid::new_v4(), other).await.unwrap();

        let releasing = {
            let engine = engine.clone();
            let id = released.id;
            tokio::spawn(async move {
                engine
                    .release(id, ReleaseCondition::CustomerConfirmation, None)
                    .await
            })
        };
        // Park the release inside the notification sink.
        entered.notified().await;

        // An unrelated escrow stays readable while the sink is stuck.
        let read = tokio::time::timeout(Duration::from_millis(200), engine.get(unrelated.id))
            .await
            .expect("escrow read blocked behind notification I/O");
        assert_eq!(read.unwrap().status, EscrowStatus::Held);

        // The winner already claimed the terminal status.
        assert_eq!(
            engine.get(released.id).await.unwrap().status,
            EscrowStatus::ReleasedToDriver
        );

        gate.notify_one();
        entered.notified().await;
        gate.notify_one();
        let done = releasing.await.unwrap().unwrap();
        assert_eq!(done.status, EscrowStatus::ReleasedToDriver);
        assert_eq!(
            ledger.get_or_create_wallet("seller-1").await.balance,
            BigDecimal::from(12_000)
        );
    }

    #[tokio::test]
    async fn auto_release_sweep_releases_due_holds_only() {
        let (ledger, engine) = engine();
        let due = engine.hold(Uuid::new_v4(), split()).await.unwrap();
        let mut other = split();
        other.order_id = "order-2".to_string();
        let not_due = engine.hold(Uuid::new_v4(), other).await.unwrap();

        engine
            .schedule_auto_release(due.id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        engine
            .schedule_auto_release(not_due.id, Utc::now() + chrono::Duration::hours(24))
            .await
            .unwrap();

        let released = engine.auto_release_due().await;
        assert_eq!(released, 1);
        assert_eq!(
            engine.get(due.id).await.unwrap().status,
            EscrowStatus::ReleasedToDriver
        );
        assert_eq!(
            engine.get(not_due.id).await.unwrap().status,
            EscrowStatus::Held
        );
        assert_eq!(
            ledger.get_or_create_wallet("seller-1").await.balance,
            BigDecimal::from(12_000)
        );
    }
}
