//! External notification sinks (push/email/SMS). Fire-and-forget: a failed
//! notification must never fail the financial operation it reports on.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PaymentNotice {
    pub identity_id: String,
    pub transaction_id: Uuid,
    pub title: String,
    pub body: String,
    pub amount: BigDecimal,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_payment_notification(&self, notice: PaymentNotice) -> anyhow::Result<()>;
}

/// Default sink: logs the notice. Real push/email/SMS senders live outside
/// this core and plug in through the trait.
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn send_payment_notification(&self, notice: PaymentNotice) -> anyhow::Result<()> {
        tracing::info!(
            identity = %notice.identity_id,
            transaction = %notice.transaction_id,
            amount = %notice.amount,
            title = %notice.title,
            "payment notification"
        );
        Ok(())
    }
}

/// Sends through the sink and logs failures instead of propagating them.
pub async fn notify_best_effort(sink: &dyn NotificationSink, notice: PaymentNotice) {
    if let Err(err) = sink.send_payment_notification(notice).await {
        tracing::warn!(error = %err, "notification sink failed, discarding");
    }
}
