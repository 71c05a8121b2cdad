use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::transaction::InitiatePaymentRequest;
use crate::AppState;

pub async fn initialize_payment(
    State(state): State<AppState>,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let initiated = state.transactions.initiate_payment(req).await?;
    Ok((StatusCode::CREATED, Json(initiated)))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state.transactions.verify_payment(&reference).await?;
    Ok(Json(transaction))
}

#[derive(Debug, Deserialize)]
pub struct ChargeMethodRequest {
    pub owner_id: String,
    pub payment_method_id: Uuid,
    pub amount: BigDecimal,
    pub email: String,
}

pub async fn charge_payment_method(
    State(state): State<AppState>,
    Json(req): Json<ChargeMethodRequest>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state
        .transactions
        .charge_payment_method(&req.owner_id, req.payment_method_id, req.amount, &req.email)
        .await?;
    Ok(Json(transaction))
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub from_id: String,
    pub to_id: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn transfer(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> Result<impl IntoResponse, AppError> {
    let description = req.description.unwrap_or_else(|| "wallet transfer".to_string());
    let (debit, credit) = state
        .transactions
        .transfer(&req.from_id, &req.to_id, req.amount, &description)
        .await?;
    Ok(Json(serde_json::json!({ "debit": debit, "credit": credit })))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let wallet = state.ledger.get_or_create_wallet(&owner_id).await;
    Ok(Json(wallet))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let transactions = state
        .transactions
        .get_user_transactions(&owner_id, query.limit)
        .await;
    Ok(Json(transactions))
}
