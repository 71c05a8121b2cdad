//! Ledger store: wallets plus an append-only transaction log.
//!
//! Every operation that touches a balance together with a transaction row
//! runs inside a single write-guard critical section, so partial application
//! (money moved, ledger not updated, or vice versa) is structurally
//! impossible. No guard is ever held across an await point.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::money;
use crate::domain::{Transaction, TransactionStatus, TransactionType, Wallet};
use crate::error::AppError;

#[derive(Default)]
struct LedgerData {
    wallets: HashMap<String, Wallet>,
    transactions: HashMap<Uuid, Transaction>,
    by_owner: HashMap<String, Vec<Uuid>>,
    by_reference: HashMap<String, Uuid>,
}

impl LedgerData {
    fn wallet_mut(&mut self, owner_id: &str, currency: &str) -> &mut Wallet {
        self.wallets
            .entry(owner_id.to_string())
            .or_insert_with(|| Wallet::new(owner_id, currency))
    }

    fn credit_wallet(&mut self, owner_id: &str, amount: &BigDecimal, currency: &str) {
        let wallet = self.wallet_mut(owner_id, currency);
        wallet.balance += amount;
        wallet.last_activity = Utc::now();
    }

    fn debit_wallet(
        &mut self,
        owner_id: &str,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<(), AppError> {
        let wallet = self.wallet_mut(owner_id, currency);
        if &wallet.balance < amount {
            return Err(AppError::InsufficientFunds);
        }
        wallet.balance -= amount;
        wallet.last_activity = Utc::now();
        Ok(())
    }

    fn insert_transaction(&mut self, txn: Transaction) -> Transaction {
        self.by_owner
            .entry(txn.owner_id.clone())
            .or_default()
            .push(txn.id);
        if let Some(reference) = &txn.gateway_reference {
            self.by_reference.insert(reference.clone(), txn.id);
        }
        self.transactions.insert(txn.id, txn.clone());
        txn
    }
}

pub struct Ledger {
    data: RwLock<LedgerData>,
    currency: String,
}

impl Ledger {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            data: RwLock::new(LedgerData::default()),
            currency: currency.into(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Created lazily on first access, never deleted.
    pub async fn get_or_create_wallet(&self, owner_id: &str) -> Wallet {
        let mut data = self.data.write().await;
        data.wallet_mut(owner_id, &self.currency).clone()
    }

    pub async fn credit(&self, owner_id: &str, amount: &BigDecimal) -> Result<Wallet, AppError> {
        money::require_positive(amount)?;
        let mut data = self.data.write().await;
        data.credit_wallet(owner_id, amount, &self.currency);
        Ok(data.wallets[owner_id].clone())
    }

    pub async fn debit(&self, owner_id: &str, amount: &BigDecimal) -> Result<Wallet, AppError> {
        money::require_positive(amount)?;
        let mut data = self.data.write().await;
        data.debit_wallet(owner_id, amount, &self.currency)?;
        Ok(data.wallets[owner_id].clone())
    }

    pub async fn record_transaction(&self, txn: Transaction) -> Transaction {
        let mut data = self.data.write().await;
        data.insert_transaction(txn)
    }

    pub async fn get_transaction(&self, id: Uuid) -> Result<Transaction, AppError> {
        let data = self.data.read().await;
        data.transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))
    }

    pub async fn find_by_reference(&self, reference: &str) -> Result<Transaction, AppError> {
        let data = self.data.read().await;
        data.by_reference
            .get(reference)
            .and_then(|id| data.transactions.get(id))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("transaction with reference {}", reference)))
    }

    /// Most recent first.
    pub async fn list_transactions(&self, owner_id: &str, limit: usize) -> Vec<Transaction> {
        let data = self.data.read().await;
        let Some(ids) = data.by_owner.get(owner_id) else {
            return Vec::new();
        };
        ids.iter()
            .rev()
            .take(limit)
            .filter_map(|id| data.transactions.get(id))
            .cloned()
            .collect()
    }

    pub async fn update_metadata(
        &self,
        id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        let mut data = self.data.write().await;
        let txn = data
            .transactions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;
        txn.metadata = Some(metadata);
        Ok(())
    }

    /// Marks a transaction SUCCESS, sets its fee and net amount, and when
    /// `credit_wallet` is set credits the owner's wallet with the net amount.
    /// One atomic unit. Fails InvalidState if the transaction is already
    /// terminal, so duplicate verifications cannot double-credit.
    pub async fn settle_success(
        &self,
        id: Uuid,
        fee: BigDecimal,
        credit_wallet: bool,
    ) -> Result<Transaction, AppError> {
        let mut data = self.data.write().await;
        let txn = data
            .transactions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;
        if txn.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "transaction {} already {:?}",
                id, txn.status
            )));
        }
        txn.status = TransactionStatus::Success;
        txn.net_amount = &txn.amount - &fee;
        txn.fee = fee;
        txn.completed_at = Some(Utc::now());
        let updated = txn.clone();
        if credit_wallet {
            let owner = updated.owner_id.clone();
            let net = updated.net_amount.clone();
            data.credit_wallet(&owner, &net, &self.currency);
        }
        Ok(updated)
    }

    /// PENDING/PROCESSING -> FAILED. The status never reverts from terminal.
    pub async fn mark_failed(&self, id: Uuid) -> Result<Transaction, AppError> {
        let mut data = self.data.write().await;
        let txn = data
            .transactions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;
        if txn.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "transaction {} already {:?}",
                id, txn.status
            )));
        }
        txn.status = TransactionStatus::Failed;
        txn.failed_at = Some(Utc::now());
        Ok(txn.clone())
    }

    /// Wallet credit plus a new SUCCESS transaction row as one unit. This is
    /// the escrow release / refund disbursement path.
    pub async fn credit_with_record(
        &self,
        owner_id: &str,
        amount: &BigDecimal,
        mut txn: Transaction,
    ) -> Result<Transaction, AppError> {
        money::require_positive(amount)?;
        let mut data = self.data.write().await;
        data.credit_wallet(owner_id, amount, &self.currency);
        txn.status = TransactionStatus::Success;
        txn.completed_at = Some(Utc::now());
        Ok(data.insert_transaction(txn))
    }

    /// Wallet-to-wallet transfer: balance check, debit, credit and two linked
    /// TRANSFER rows, all-or-nothing. On InsufficientFunds nothing is written.
    pub async fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        amount: &BigDecimal,
        description: &str,
    ) -> Result<(Transaction, Transaction), AppError> {
        money::require_positive(amount)?;
        if from_id == to_id {
            return Err(AppError::Validation(
                "cannot transfer to the same wallet".to_string(),
            ));
        }
        let mut data = self.data.write().await;
        data.debit_wallet(from_id, amount, &self.currency)?;
        data.credit_wallet(to_id, amount, &self.currency);

        let mut debit_txn =
            Transaction::new(from_id, TransactionType::Transfer, amount.clone(), &self.currency)
                .with_recipient(to_id)
                .with_description(description);
        debit_txn.status = TransactionStatus::Success;
        debit_txn.completed_at = Some(Utc::now());

        let mut credit_txn =
            Transaction::new(to_id, TransactionType::Transfer, amount.clone(), &self.currency)
                .with_description(description);
        credit_txn.recipient_id = Some(from_id.to_string());
        credit_txn.status = TransactionStatus::Success;
        credit_txn.completed_at = Some(Utc::now());
        // Symmetric audit visibility: each row points at its counterpart.
        credit_txn.metadata = Some(serde_json::json!({ "counterpart": debit_txn.id }));
        debit_txn.metadata = Some(serde_json::json!({ "counterpart": credit_txn.id }));

        let debit_txn = data.insert_transaction(debit_txn);
        let credit_txn = data.insert_transaction(credit_txn);
        Ok((debit_txn, credit_txn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> Ledger {
        Ledger::new("NGN")
    }

    #[tokio::test]
    async fn wallet_created_lazily_with_zero_balance() {
        let ledger = ledger();
        let wallet = ledger.get_or_create_wallet("user-1").await;
        assert_eq!(wallet.balance, BigDecimal::from(0));
        assert!(wallet.active);
    }

    #[tokio::test]
    async fn debit_beyond_balance_fails_and_changes_nothing() {
        let ledger = ledger();
        ledger.credit("a", &BigDecimal::from(300)).await.unwrap();
        let err = ledger.debit("a", &BigDecimal::from(500)).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds));
        let wallet = ledger.get_or_create_wallet("a").await;
        assert_eq!(wallet.balance, BigDecimal::from(300));
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_records_two_rows() {
        let ledger = ledger();
        ledger.credit("a", &BigDecimal::from(1000)).await.unwrap();
        let (debit, credit) = ledger
            .transfer("a", "b", &BigDecimal::from(400), "lunch")
            .await
            .unwrap();
        assert_eq!(ledger.get_or_create_wallet("a").await.balance, BigDecimal::from(600));
        assert_eq!(ledger.get_or_create_wallet("b").await.balance, BigDecimal::from(400));
        assert_eq!(debit.kind, TransactionType::Transfer);
        assert_eq!(credit.kind, TransactionType::Transfer);
        assert_eq!(debit.owner_id, "a");
        assert_eq!(credit.owner_id, "b");
    }

    #[tokio::test]
    async fn failed_transfer_writes_no_rows() {
        let ledger = ledger();
        ledger.credit("a", &BigDecimal::from(300)).await.unwrap();
        let err = ledger
            .transfer("a", "b", &BigDecimal::from(500), "too much")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds));
        assert!(ledger.list_transactions("a", 10).await.is_empty());
        assert!(ledger.list_transactions("b", 10).await.is_empty());
        assert_eq!(ledger.get_or_create_wallet("b").await.balance, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn settle_success_is_single_shot() {
        let ledger = ledger();
        let txn = Transaction::new("u", TransactionType::Deposit, BigDecimal::from(100), "NGN");
        let id = ledger.record_transaction(txn).await.id;

        let settled = ledger
            .settle_success(id, BigDecimal::from(2), true)
            .await
            .unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);
        assert_eq!(settled.net_amount, BigDecimal::from(98));
        assert_eq!(ledger.get_or_create_wallet("u").await.balance, BigDecimal::from(98));

        // Second settlement attempt must not credit again.
        let err = ledger
            .settle_success(id, BigDecimal::from(2), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(ledger.get_or_create_wallet("u").await.balance, BigDecimal::from(98));
    }

    #[tokio::test]
    async fn terminal_status_never_reverts() {
        let ledger = ledger();
        let txn = Transaction::new("u", TransactionType::Payment, BigDecimal::from(50), "NGN");
        let id = ledger.record_transaction(txn).await.id;
        ledger.mark_failed(id).await.unwrap();
        assert!(ledger
            .settle_success(id, BigDecimal::from(0), false)
            .await
            .is_err());
        assert!(ledger.mark_failed(id).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_debits_never_go_negative() {
        use std::sync::Arc;

        let ledger = Arc::new(ledger());
        ledger.credit("hot", &BigDecimal::from(100)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .transfer("hot", &format!("sink-{}", i), &BigDecimal::from(30), "drain")
                    .await
                    .is_ok()
            }));
        }
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }
        // 100 / 30 allows exactly three transfers through.
        assert_eq!(succeeded, 3);
        let balance = ledger.get_or_create_wallet("hot").await.balance;
        assert_eq!(balance, BigDecimal::from(10));
        assert!(balance >= BigDecimal::from(0));
    }

    #[tokio::test]
    async fn find_by_reference() {
        let ledger = ledger();
        let txn = Transaction::new("u", TransactionType::Payment, BigDecimal::from(10), "NGN")
            .with_reference("ref-123");
        ledger.record_transaction(txn).await;
        let found = ledger.find_by_reference("ref-123").await.unwrap();
        assert_eq!(found.gateway_reference.as_deref(), Some("ref-123"));
        assert!(ledger.find_by_reference("missing").await.is_err());
    }
}
