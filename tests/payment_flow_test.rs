mod common;

use bigdecimal::BigDecimal;
use common::{build_app, FakeGateway, VerifyScript};
use escrow_core::domain::escrow::EscrowSplit;
use escrow_core::domain::{EscrowStatus, ReleaseCondition, TransactionStatus, TransactionType};
use escrow_core::error::AppError;
use escrow_core::services::transaction::InitiatePaymentRequest;
use std::sync::atomic::Ordering;

fn split_for(order_id: &str) -> EscrowSplit {
    EscrowSplit {
        order_id: order_id.to_string(),
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

fn order_payment_request() -> InitiatePaymentRequest {
    InitiatePaymentRequest {
        owner_id: "buyer-1".to_string(),
        email: "buyer@example.com".to_string(),
        amount: BigDecimal::from(15_000),
        order_id: Some("O1".to_string()),
        split: Some(split_for("O1")),
    }
}

#[tokio::test]
async fn split_payment_creates_held_escrow_and_success_leaves_buyer_wallet_alone() {
    let app = build_app(FakeGateway::succeeding(150 * 100));
    let txns = &app.state.transactions;

    let initiated = txns.initiate_payment(order_payment_request()).await.unwrap();
    assert_eq!(initiated.transaction.kind, TransactionType::Payment);
    assert_eq!(initiated.transaction.status, TransactionStatus::Pending);
    assert!(initiated.authorization_url.contains("checkout"));

    let escrow_id = initiated.escrow_id.expect("split payment creates an escrow");
    let escrow = app.state.escrow.get(escrow_id).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::Held);
    assert_eq!(escrow.total_amount, BigDecimal::from(15_000));

    let verified = txns.verify_payment(&initiated.reference).await.unwrap();
    assert_eq!(verified.status, TransactionStatus::Success);
    assert_eq!(verified.fee, BigDecimal::from(150));
    assert_eq!(verified.net_amount, BigDecimal::from(14_850));

    // An order PAYMENT never auto-credits the buyer's wallet.
    let buyer_wallet = app.state.ledger.get_or_create_wallet("buyer-1").await;
    assert_eq!(buyer_wallet.balance, BigDecimal::from(0));

    // Payment confirmation armed the auto-release timer.
    let escrow = app.state.escrow.get(escrow_id).await.unwrap();
    assert!(escrow.auto_release_at.is_some());
}

#[tokio::test]
async fn customer_confirmation_release_pays_seller_and_driver() {
    let app = build_app(FakeGateway::succeeding(0));
    let txns = &app.state.transactions;

    let initiated = txns.initiate_payment(order_payment_request()).await.unwrap();
    txns.verify_payment(&initiated.reference).await.unwrap();
    let escrow_id = initiated.escrow_id.unwrap();

    let released = app
        .state
        .escrow
        .release(escrow_id, ReleaseCondition::CustomerConfirmation, None)
        .await
        .unwrap();

    assert_eq!(released.status, EscrowStatus::ReleasedToDriver);
    let ledger = &app.state.ledger;
    assert_eq!(
        ledger.get_or_create_wallet("seller-1").await.balance,
        BigDecimal::from(12_000)
    );
    assert_eq!(
        ledger.get_or_create_wallet("driver-1").await.balance,
        BigDecimal::from(2_000)
    );

    let seller_rows = ledger.list_transactions("seller-1", 10).await;
    let driver_rows = ledger.list_transactions("driver-1", 10).await;
    assert_eq!(seller_rows.len(), 1);
    assert_eq!(driver_rows.len(), 1);
    assert_eq!(seller_rows[0].kind, TransactionType::EscrowRelease);
    assert_eq!(driver_rows[0].kind, TransactionType::EscrowRelease);
}

#[tokio::test]
async fn verify_payment_is_idempotent_for_deposits() {
    let app = build_app(FakeGateway::succeeding(0));
    let txns = &app.state.transactions;

    let initiated = txns
        .initiate_payment(InitiatePaymentRequest {
            owner_id: "user-1".to_string(),
            email: "user@example.com".to_string(),
            amount: BigDecimal::from(500),
            order_id: None,
            split: None,
        })
        .await
        .unwrap();
    assert_eq!(initiated.transaction.kind, TransactionType::Deposit);

    let first = txns.verify_payment(&initiated.reference).await.unwrap();
    assert_eq!(first.status, TransactionStatus::Success);
    let second = txns.verify_payment(&initiated.reference).await.unwrap();
    assert_eq!(second.status, TransactionStatus::Success);

    // Wallet credited exactly once, gateway asked exactly once.
    let wallet = app.state.ledger.get_or_create_wallet("user-1").await;
    assert_eq!(wallet.balance, BigDecimal::from(500));
    assert_eq!(app.gateway.verify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transfer_with_insufficient_funds_changes_nothing() {
    let app = build_app(FakeGateway::succeeding(0));
    let ledger = &app.state.ledger;
    ledger.credit("A", &BigDecimal::from(300)).await.unwrap();

    let err = app
        .state
        .transactions
        .transfer("A", "B", BigDecimal::from(500), "test")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds));

    assert_eq!(ledger.get_or_create_wallet("A").await.balance, BigDecimal::from(300));
    assert_eq!(ledger.get_or_create_wallet("B").await.balance, BigDecimal::from(0));
    assert!(ledger.list_transactions("A", 10).await.is_empty());
    assert!(ledger.list_transactions("B", 10).await.is_empty());
}

#[tokio::test]
async fn gateway_failure_marks_transaction_failed() {
    let app = build_app(FakeGateway::with_script(VerifyScript::Failed));
    let txns = &app.state.transactions;

    let initiated = txns
        .initiate_payment(InitiatePaymentRequest {
            owner_id: "user-2".to_string(),
            email: "user2@example.com".to_string(),
            amount: BigDecimal::from(100),
            order_id: None,
            split: None,
        })
        .await
        .unwrap();

    let verified = txns.verify_payment(&initiated.reference).await.unwrap();
    assert_eq!(verified.status, TransactionStatus::Failed);
    assert_eq!(
        app.state.ledger.get_or_create_wallet("user-2").await.balance,
        BigDecimal::from(0)
    );
}

#[tokio::test]
async fn gateway_timeout_leaves_transaction_pending() {
    let app = build_app(FakeGateway::with_script(VerifyScript::Timeout));
    let txns = &app.state.transactions;

    let initiated = txns
        .initiate_payment(InitiatePaymentRequest {
            owner_id: "user-3".to_string(),
            email: "user3@example.com".to_string(),
            amount: BigDecimal::from(100),
            order_id: None,
            split: None,
        })
        .await
        .unwrap();

    let err = txns.verify_payment(&initiated.reference).await.unwrap_err();
    assert!(matches!(err, AppError::GatewayTimeout));

    // Left PENDING for webhook reconciliation, not FAILED.
    let txn = app
        .state
        .ledger
        .find_by_reference(&initiated.reference)
        .await
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Pending);

    // The gateway recovered; a later verification settles it.
    *app.gateway.verify_script.lock().unwrap() = VerifyScript::Success {
        fee_minor: 0,
        reusable_auth: false,
    };
    let verified = txns.verify_payment(&initiated.reference).await.unwrap();
    assert_eq!(verified.status, TransactionStatus::Success);
}

#[tokio::test]
async fn mismatched_split_is_rejected_before_any_state() {
    let app = build_app(FakeGateway::succeeding(0));
    let mut req = order_payment_request();
    let mut split = split_for("O1");
    split.platform_fee = BigDecimal::from(999);
    req.split = Some(split);

    let err = app.state.transactions.initiate_payment(req).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(app.gateway.init_calls.load(Ordering::SeqCst), 0);
    assert!(app
        .state
        .transactions
        .get_user_transactions("buyer-1", 10)
        .await
        .is_empty());
}

#[tokio::test]
async fn reusable_authorization_saves_default_payment_method_once() {
    let app = build_app(FakeGateway::with_script(VerifyScript::Success {
        fee_minor: 0,
        reusable_auth: true,
    }));
    let txns = &app.state.transactions;

    for _ in 0..2 {
        let initiated = txns
            .initiate_payment(InitiatePaymentRequest {
                owner_id: "user-4".to_string(),
                email: "user4@example.com".to_string(),
                amount: BigDecimal::from(100),
                order_id: None,
                split: None,
            })
            .await
            .unwrap();
        txns.verify_payment(&initiated.reference).await.unwrap();
    }

    // Same card fingerprint: saved once, still the single default.
    let methods = txns.list_payment_methods("user-4").await;
    assert_eq!(methods.len(), 1);
    assert!(methods[0].is_default);

    // And the saved method can be charged again through the same path.
    let charged = txns
        .charge_payment_method(
            "user-4",
            methods[0].id,
            BigDecimal::from(250),
            "user4@example.com",
        )
        .await
        .unwrap();
    assert_eq!(charged.status, TransactionStatus::Success);
    assert_eq!(
        app.state.ledger.get_or_create_wallet("user-4").await.balance,
        BigDecimal::from(450)
    );
}

#[tokio::test]
async fn charging_someone_elses_method_is_not_found() {
    let app = build_app(FakeGateway::with_script(VerifyScript::Success {
        fee_minor: 0,
        reusable_auth: true,
    }));
    let txns = &app.state.transactions;

    let initiated = txns
        .initiate_payment(InitiatePaymentRequest {
            owner_id: "owner".to_string(),
            email: "owner@example.com".to_string(),
            amount: BigDecimal::from(100),
            order_id: None,
            split: None,
        })
        .await
        .unwrap();
    txns.verify_payment(&initiated.reference).await.unwrap();
    let method = txns.list_payment_methods("owner").await.remove(0);

    let err = txns
        .charge_payment_method("intruder", method.id, BigDecimal::from(50), "x@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
