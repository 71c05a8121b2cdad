//! Gateway webhook endpoint. The signature is validated against the raw body
//! before any business logic runs; `charge.*` events funnel into the
//! idempotent verification path, so webhook delivery and client polling can
//! race safely.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    reference: Option<String>,
}

pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing webhook signature".to_string()))?;

    if !state.gateway.validate_webhook_signature(signature, &body) {
        tracing::warn!("webhook rejected: bad signature");
        return Err(AppError::Validation("invalid webhook signature".to_string()));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed webhook body: {}", e)))?;

    match event.event.as_str() {
        "charge.success" | "charge.failed" => {
            let Some(reference) = event.data.reference else {
                return Err(AppError::Validation(
                    "charge event without reference".to_string(),
                ));
            };
            match state.transactions.verify_payment(&reference).await {
                Ok(txn) => {
                    tracing::info!(reference, status = ?txn.status, "webhook processed");
                }
                Err(AppError::NotFound(detail)) => {
                    // A reference we never issued; acknowledge so the gateway
                    // stops retrying.
                    tracing::warn!(reference, detail, "webhook for unknown transaction");
                }
                Err(err) => {
                    tracing::error!(reference, error = %err, "webhook verification failed");
                    return Err(err);
                }
            }
        }
        "transfer.success" | "transfer.failed" => {
            tracing::info!(event = %event.event, "gateway transfer event acknowledged");
        }
        other => {
            tracing::debug!(event = other, "unhandled webhook event ignored");
        }
    }

    Ok(StatusCode::OK)
}
