//! Shared test fixtures: a scripted fake gateway and a fully wired engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use escrow_core::config::Config;
use escrow_core::gateway::{
    ChargeInit, ChargeStatus, ChargeVerification, GatewayAuthorization, GatewayError,
    PaymentGateway,
};
use escrow_core::services::{InMemoryOrderStore, TracingNotifier};
use escrow_core::AppState;

#[derive(Clone, Copy, Debug)]
pub enum VerifyScript {
    Success { fee_minor: i64, reusable_auth: bool },
    Failed,
    Timeout,
}

pub struct FakeGateway {
    pub verify_script: Mutex<VerifyScript>,
    pub verify_calls: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub fail_init: bool,
}

impl FakeGateway {
    pub fn succeeding(fee_minor: i64) -> Self {
        Self {
            verify_script: Mutex::new(VerifyScript::Success {
                fee_minor,
                reusable_auth: false,
            }),
            verify_calls: AtomicUsize::new(0),
            init_calls: AtomicUsize::new(0),
            fail_init: false,
        }
    }

    pub fn with_script(script: VerifyScript) -> Self {
        Self {
            verify_script: Mutex::new(script),
            verify_calls: AtomicUsize::new(0),
            init_calls: AtomicUsize::new(0),
            fail_init: false,
        }
    }

    fn verification(&self) -> Result<ChargeVerification, GatewayError> {
        match *self.verify_script.lock().unwrap() {
            VerifyScript::Success {
                fee_minor,
                reusable_auth,
            } => Ok(ChargeVerification {
                status: ChargeStatus::Success,
                fee_minor,
                channel: Some("card".to_string()),
                authorization: reusable_auth.then(|| GatewayAuthorization {
                    authorization_code: "AUTH_fake".to_string(),
                    bin: Some("408408".to_string()),
                    last4: Some("4081".to_string()),
                    exp_month: Some("12".to_string()),
                    exp_year: Some("2030".to_string()),
                    card_type: Some("visa".to_string()),
                    bank: Some("TEST BANK".to_string()),
                    customer_code: Some("CUS_fake".to_string()),
                    signature: Some("SIG_fake".to_string()),
                    reusable: true,
                }),
                raw: serde_json::json!({}),
            }),
            VerifyScript::Failed => Ok(ChargeVerification {
                status: ChargeStatus::Failed,
                fee_minor: 0,
                channel: None,
                authorization: None,
                raw: serde_json::json!({}),
            }),
            VerifyScript::Timeout => Err(GatewayError::Timeout),
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize_charge(
        &self,
        _email: &str,
        _amount_minor: i64,
        reference: &str,
        _metadata: serde_json::Value,
        _channels: &[String],
    ) -> Result<ChargeInit, GatewayError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(GatewayError::Api("declined".to_string()));
        }
        Ok(ChargeInit {
            authorization_url: format!("https://checkout.test/{}", reference),
            access_code: "ac_test".to_string(),
            reference: reference.to_string(),
        })
    }

    async fn verify_charge(&self, _reference: &str) -> Result<ChargeVerification, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verification()
    }

    async fn charge_stored_authorization(
        &self,
        _authorization_code: &str,
        _email: &str,
        _amount_minor: i64,
        _reference: &str,
        _metadata: serde_json::Value,
    ) -> Result<ChargeVerification, GatewayError> {
        self.verification()
    }

    fn validate_webhook_signature(&self, signature_header: &str, _raw_body: &[u8]) -> bool {
        signature_header == "valid-signature"
    }
}

pub fn test_config() -> Config {
    // Not read from the environment so tests stay hermetic.
    Config {
        server_port: 0,
        currency: "NGN".to_string(),
        gateway_base_url: "http://unused".to_string(),
        gateway_secret_key: "sk_test".to_string(),
        gateway_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(300),
        heartbeat_interval: Duration::from_secs(30),
        sweep_interval: Duration::from_secs(60),
        escrow_sweep_interval: Duration::from_secs(60),
        escrow_auto_release: chrono::Duration::hours(48),
    }
}

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub orders: Arc<InMemoryOrderStore>,
}

pub fn build_app(gateway: FakeGateway) -> TestApp {
    let gateway = Arc::new(gateway);
    let orders = Arc::new(InMemoryOrderStore::new());
    let state = AppState::build(
        gateway.clone(),
        orders.clone(),
        Arc::new(TracingNotifier),
        &test_config(),
    );
    TestApp {
        state,
        gateway,
        orders,
    }
}
