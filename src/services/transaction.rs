//! Transaction service: payment initiation, verification, wallet transfers
//! and stored-authorization charges, orchestrating the ledger, the gateway
//! adapter and the escrow engine.

use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::escrow::EscrowSplit;
use crate::domain::{money, EscrowStatus, PaymentMethod, Transaction, TransactionStatus, TransactionType};
use crate::error::AppError;
use crate::gateway::{ChargeStatus, ChargeVerification, GatewayAuthorization, GatewayError, PaymentGateway};
use crate::ledger::Ledger;
use crate::realtime::message::{MessageKind, PaymentConfirmationPayload};
use crate::realtime::{BroadcastRouter, RealtimeMessage};
use crate::services::escrow::EscrowEngine;
use crate::services::notify::{notify_best_effort, NotificationSink, PaymentNotice};

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub owner_id: String,
    pub email: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub split: Option<EscrowSplit>,
}

#[derive(Debug, Serialize)]
pub struct InitiatedPayment {
    pub transaction: Transaction,
    pub authorization_url: String,
    pub reference: String,
    pub escrow_id: Option<Uuid>,
}

#[derive(Default)]
struct PaymentMethodStore {
    methods: HashMap<Uuid, PaymentMethod>,
    by_owner: HashMap<String, Vec<Uuid>>,
}

pub struct TransactionService {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    escrow: Arc<EscrowEngine>,
    router: Arc<BroadcastRouter>,
    notifier: Arc<dyn NotificationSink>,
    payment_methods: RwLock<PaymentMethodStore>,
    auto_release_window: chrono::Duration,
}

impl TransactionService {
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        escrow: Arc<EscrowEngine>,
        router: Arc<BroadcastRouter>,
        notifier: Arc<dyn NotificationSink>,
        auto_release_window: chrono::Duration,
    ) -> Self {
        Self {
            ledger,
            gateway,
            escrow,
            router,
            notifier,
            payment_methods: RwLock::new(PaymentMethodStore::default()),
            auto_release_window,
        }
    }

    fn new_reference() -> String {
        format!("txn-{}", Uuid::new_v4().simple())
    }

    /// Creates a PENDING transaction and a hosted-checkout session. With split
    /// info present the escrow hold is created from the *requested* split;
    /// verification later confirms the money actually arrived.
    pub async fn initiate_payment(
        &self,
        req: InitiatePaymentRequest,
    ) -> Result<InitiatedPayment, AppError> {
        money::require_positive(&req.amount)?;
        if let Some(split) = &req.split {
            split.validate()?;
            if split.total_amount != req.amount {
                return Err(AppError::Validation(format!(
                    "split total {} does not match payment amount {}",
                    split.total_amount, req.amount
                )));
            }
        }

        let kind = if req.order_id.is_some() || req.split.is_some() {
            TransactionType::Payment
        } else {
            TransactionType::Deposit
        };
        let reference = Self::new_reference();
        let amount_minor = money::to_minor_units(&req.amount)?;

        let mut txn = Transaction::new(
            req.owner_id.clone(),
            kind,
            req.amount.clone(),
            self.ledger.currency(),
        )
        .with_reference(reference.clone());
        if let Some(order_id) = &req.order_id {
            txn = txn.with_order(order_id.clone());
        }
        let txn = self.ledger.record_transaction(txn).await;

        let metadata = serde_json::json!({
            "owner_id": req.owner_id,
            "order_id": req.order_id,
        });
        let channels = ["card".to_string(), "bank".to_string()];
        let init = match self
            .gateway
            .initialize_charge(&req.email, amount_minor, &reference, metadata, &channels)
            .await
        {
            Ok(init) => init,
            Err(GatewayError::Timeout) => {
                // The charge session may exist gateway-side; leave PENDING so
                // a webhook or poll can still complete it.
                tracing::warn!(reference, "gateway timed out during initialize, left pending");
                return Err(AppError::GatewayTimeout);
            }
            Err(err) => {
                let _ = self.ledger.mark_failed(txn.id).await;
                tracing::error!(reference, error = %err, "charge initialization failed");
                return Err(err.into());
            }
        };

        self.ledger
            .update_metadata(txn.id, serde_json::json!({ "access_code": init.access_code }))
            .await?;

        let mut escrow_id = None;
        if let Some(split) = req.split {
            let escrow = self.escrow.hold(txn.id, split).await?;
            escrow_id = Some(escrow.id);
        }

        let transaction = self.ledger.get_transaction(txn.id).await?;
        Ok(InitiatedPayment {
            transaction,
            authorization_url: init.authorization_url,
            reference: init.reference,
            escrow_id,
        })
    }

    /// Verifies a charge by reference. Idempotent: webhook delivery and
    /// client polling may race for the same reference, and side effects run
    /// exactly once because an already-SUCCESS transaction short-circuits.
    pub async fn verify_payment(&self, reference: &str) -> Result<Transaction, AppError> {
        let txn = self.ledger.find_by_reference(reference).await?;
        if txn.status == TransactionStatus::Success {
            tracing::debug!(reference, "verification replay, already settled");
            return Ok(txn);
        }

        let verification = match self.gateway.verify_charge(reference).await {
            Ok(v) => v,
            Err(GatewayError::Timeout) => {
                tracing::warn!(reference, "gateway verify timed out, left pending");
                return Err(AppError::GatewayTimeout);
            }
            Err(err) => {
                let _ = self.ledger.mark_failed(txn.id).await;
                return Err(err.into());
            }
        };

        self.apply_verification(txn, verification).await
    }

    /// Single-sourced success handling shared by `verify_payment` and
    /// `charge_payment_method`.
    async fn apply_verification(
        &self,
        txn: Transaction,
        verification: ChargeVerification,
    ) -> Result<Transaction, AppError> {
        match verification.status {
            ChargeStatus::Success => {}
            ChargeStatus::Failed => {
                let failed = self.ledger.mark_failed(txn.id).await?;
                tracing::info!(transaction = %txn.id, "charge failed at gateway");
                return Ok(failed);
            }
            ChargeStatus::Pending => {
                tracing::debug!(transaction = %txn.id, "charge still pending at gateway");
                return Ok(txn);
            }
        }

        let fee = money::from_minor_units(verification.fee_minor);
        // Only deposits fund the payer's wallet; order payments sit in escrow.
        let credit_wallet = txn.kind == TransactionType::Deposit;
        let settled = match self.ledger.settle_success(txn.id, fee, credit_wallet).await {
            Ok(settled) => settled,
            Err(AppError::InvalidState(_)) => {
                // A concurrent verification settled it first.
                return self.ledger.get_transaction(txn.id).await;
            }
            Err(err) => return Err(err),
        };

        if let Some(authorization) = verification.authorization {
            if authorization.reusable {
                self.save_payment_method(&settled.owner_id, authorization, &verification.channel)
                    .await;
            }
        }

        notify_best_effort(
            self.notifier.as_ref(),
            PaymentNotice {
                identity_id: settled.owner_id.clone(),
                transaction_id: settled.id,
                title: "Payment successful".to_string(),
                body: format!("Payment of {} {} confirmed", settled.amount, settled.currency),
                amount: settled.amount.clone(),
            },
        )
        .await;

        let confirmation = RealtimeMessage::system(MessageKind::PaymentConfirmation(
            PaymentConfirmationPayload {
                transaction_id: settled.id,
                reference: settled.gateway_reference.clone().unwrap_or_default(),
                amount: settled.amount.clone(),
                currency: settled.currency.clone(),
                status: "SUCCESS".to_string(),
                order_id: settled.order_id.clone(),
            },
        ))
        .to(settled.owner_id.clone());
        self.router.send_to_identity(&settled.owner_id, confirmation);

        // Funds confirmed: arm the escrow auto-release timer.
        if let Ok(escrow) = self.escrow.get_by_transaction(settled.id).await {
            if escrow.status == EscrowStatus::Held {
                let at = Utc::now() + self.auto_release_window;
                if let Err(err) = self.escrow.schedule_auto_release(escrow.id, at).await {
                    tracing::warn!(escrow = %escrow.id, error = %err, "auto-release scheduling skipped");
                }
            }
        }

        Ok(settled)
    }

    async fn save_payment_method(
        &self,
        owner_id: &str,
        authorization: GatewayAuthorization,
        channel: &Option<String>,
    ) {
        let mut store = self.payment_methods.write().await;

        // The same card resurfacing is identified by its gateway fingerprint.
        if let Some(signature) = &authorization.signature {
            let duplicate = store.by_owner.get(owner_id).map_or(false, |ids| {
                ids.iter().any(|id| {
                    store.methods.get(id).and_then(|m| m.signature.as_ref()) == Some(signature)
                })
            });
            if duplicate {
                return;
            }
        }

        // At most one default per owner: unset the prior default first.
        if let Some(ids) = store.by_owner.get(owner_id).cloned() {
            for id in ids {
                if let Some(method) = store.methods.get_mut(&id) {
                    method.is_default = false;
                }
            }
        }

        let method = PaymentMethod {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            kind: channel.clone().unwrap_or_else(|| "card".to_string()),
            gateway_customer_code: authorization.customer_code,
            authorization_code: authorization.authorization_code,
            card_bin: authorization.bin,
            card_last4: authorization.last4,
            card_brand: authorization.card_type,
            exp_month: authorization.exp_month,
            exp_year: authorization.exp_year,
            bank: authorization.bank,
            signature: authorization.signature,
            is_default: true,
            active: true,
            created_at: Utc::now(),
        };
        tracing::info!(owner = owner_id, method = %method.id, "saved reusable payment method");
        store.by_owner.entry(owner_id.to_string()).or_default().push(method.id);
        store.methods.insert(method.id, method);
    }

    pub async fn get_payment_method(&self, id: Uuid) -> Result<PaymentMethod, AppError> {
        let store = self.payment_methods.read().await;
        store
            .methods
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("payment method {}", id)))
    }

    pub async fn list_payment_methods(&self, owner_id: &str) -> Vec<PaymentMethod> {
        let store = self.payment_methods.read().await;
        store
            .by_owner
            .get(owner_id)
            .map(|ids| ids.iter().filter_map(|id| store.methods.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Charges a saved authorization and funnels the result through the same
    /// settlement path as `verify_payment`.
    pub async fn charge_payment_method(
        &self,
        owner_id: &str,
        payment_method_id: Uuid,
        amount: BigDecimal,
        email: &str,
    ) -> Result<Transaction, AppError> {
        money::require_positive(&amount)?;
        let method = self.get_payment_method(payment_method_id).await?;
        if method.owner_id != owner_id {
            return Err(AppError::NotFound(format!("payment method {}", payment_method_id)));
        }
        if !method.active {
            return Err(AppError::InvalidState(format!(
                "payment method {} is inactive",
                payment_method_id
            )));
        }

        let reference = Self::new_reference();
        let amount_minor = money::to_minor_units(&amount)?;
        let mut txn = Transaction::new(
            owner_id,
            TransactionType::Deposit,
            amount,
            self.ledger.currency(),
        )
        .with_reference(reference.clone());
        txn.payment_method_id = Some(payment_method_id);
        let txn = self.ledger.record_transaction(txn).await;

        let metadata = serde_json::json!({ "payment_method_id": payment_method_id });
        let verification = match self
            .gateway
            .charge_stored_authorization(
                &method.authorization_code,
                email,
                amount_minor,
                &reference,
                metadata,
            )
            .await
        {
            Ok(v) => v,
            Err(GatewayError::Timeout) => {
                tracing::warn!(reference, "stored-authorization charge timed out, left pending");
                return Err(AppError::GatewayTimeout);
            }
            Err(err) => {
                let _ = self.ledger.mark_failed(txn.id).await;
                return Err(err.into());
            }
        };

        self.apply_verification(txn, verification).await
    }

    /// Atomic wallet-to-wallet transfer with symmetric audit rows.
    pub async fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        amount: BigDecimal,
        description: &str,
    ) -> Result<(Transaction, Transaction), AppError> {
        let (debit, credit) = self
            .ledger
            .transfer(from_id, to_id, &amount, description)
            .await?;

        notify_best_effort(
            self.notifier.as_ref(),
            PaymentNotice {
                identity_id: to_id.to_string(),
                transaction_id: credit.id,
                title: "Wallet credit".to_string(),
                body: format!("You received {} {}", credit.amount, credit.currency),
                amount: credit.amount.clone(),
            },
        )
        .await;

        Ok((debit, credit))
    }

    pub async fn get_user_transactions(&self, owner_id: &str, limit: usize) -> Vec<Transaction> {
        self.ledger.list_transactions(owner_id, limit).await
    }
}
