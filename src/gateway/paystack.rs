//! Paystack implementation of the payment gateway boundary.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha512;
use std::time::Duration;

use super::{
    ChargeInit, ChargeStatus, ChargeVerification, GatewayAuthorization, GatewayError,
    PaymentGateway,
};

type HmacSha512 = Hmac<Sha512>;

#[derive(Clone)]
pub struct PaystackGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

/// Paystack wraps every response in a `{status, message, data}` envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    #[serde(default)]
    fees: Option<i64>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    authorization: Option<AuthorizationData>,
    #[serde(default)]
    customer: Option<CustomerData>,
}

#[derive(Debug, Deserialize)]
struct AuthorizationData {
    authorization_code: String,
    #[serde(default)]
    bin: Option<String>,
    #[serde(default)]
    last4: Option<String>,
    #[serde(default)]
    exp_month: Option<String>,
    #[serde(default)]
    exp_year: Option<String>,
    #[serde(default)]
    card_type: Option<String>,
    #[serde(default)]
    bank: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    reusable: bool,
}

#[derive(Debug, Deserialize)]
struct CustomerData {
    #[serde(default)]
    customer_code: Option<String>,
}

impl PaystackGateway {
    /// Fails rather than falling back to a client without the bounded
    /// timeout every gateway call relies on.
    pub fn new(
        base_url: String,
        secret_key: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GatewayError::Request)?;
        Ok(Self {
            client,
            base_url,
            secret_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn map_error(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Request(err)
        }
    }

    fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> Result<T, GatewayError> {
        if !envelope.status {
            return Err(GatewayError::Api(envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::InvalidResponse("missing data object".to_string()))
    }

    fn into_verification(raw: serde_json::Value) -> Result<ChargeVerification, GatewayError> {
        let data: VerifyData = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let status = match data.status.as_str() {
            "success" => ChargeStatus::Success,
            "failed" | "abandoned" | "reversed" => ChargeStatus::Failed,
            _ => ChargeStatus::Pending,
        };

        let customer_code = data.customer.and_then(|c| c.customer_code);
        let authorization = data.authorization.map(|a| GatewayAuthorization {
            authorization_code: a.authorization_code,
            bin: a.bin,
            last4: a.last4,
            exp_month: a.exp_month,
            exp_year: a.exp_year,
            card_type: a.card_type,
            bank: a.bank,
            customer_code,
            signature: a.signature,
            reusable: a.reusable,
        });

        Ok(ChargeVerification {
            status,
            fee_minor: data.fees.unwrap_or(0),
            channel: data.channel,
            authorization,
            raw,
        })
    }

    async fn fetch_verification(
        &self,
        response: reqwest::Response,
    ) -> Result<ChargeVerification, GatewayError> {
        let envelope: ApiEnvelope<serde_json::Value> =
            response.json().await.map_err(Self::map_error)?;
        let data = Self::unwrap_envelope(envelope)?;
        Self::into_verification(data)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize_charge(
        &self,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: serde_json::Value,
        channels: &[String],
    ) -> Result<ChargeInit, GatewayError> {
        let body = serde_json::json!({
            "email": email,
            "amount": amount_minor,
            "reference": reference,
            "metadata": metadata,
            "channels": channels,
        });

        let response = self
            .client
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_error)?;

        let envelope: ApiEnvelope<InitializeData> =
            response.json().await.map_err(Self::map_error)?;
        let data = Self::unwrap_envelope(envelope)?;

        Ok(ChargeInit {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/transaction/verify/{}", reference)))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(Self::map_error)?;

        self.fetch_verification(response).await
    }

    async fn charge_stored_authorization(
        &self,
        authorization_code: &str,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: serde_json::Value,
    ) -> Result<ChargeVerification, GatewayError> {
        let body = serde_json::json!({
            "authorization_code": authorization_code,
            "email": email,
            "amount": amount_minor,
            "reference": reference,
            "metadata": metadata,
        });

        let response = self
            .client
            .post(self.url("/transaction/charge_authorization"))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_error)?;

        self.fetch_verification(response).await
    }

    /// Paystack signs webhook bodies with HMAC-SHA512 of the raw bytes,
    /// hex-encoded in the `x-paystack-signature` header.
    fn validate_webhook_signature(&self, signature_header: &str, raw_body: &[u8]) -> bool {
        let mut mac = match HmacSha512::new_from_slice(self.secret_key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());
        // Constant-time comparison is not needed here since the digest is
        // recomputed per request, but compare full strings regardless.
        expected == signature_header.to_lowercase()
    }
}
