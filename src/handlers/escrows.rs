use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::ReleaseCondition;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub condition: ReleaseCondition,
    #[serde(default)]
    pub released_by: Option<String>,
}

pub async fn release(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReleaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let escrow = state.escrow.release(id, req.condition, req.released_by).await?;
    Ok(Json(escrow))
}

#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    pub dispute_id: String,
}

pub async fn dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DisputeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let escrow = state.escrow.dispute(id, req.dispute_id).await?;
    Ok(Json(escrow))
}

#[derive(Debug, Deserialize, Default)]
pub struct RefundRequest {
    #[serde(default)]
    pub resolved_by: Option<String>,
}

pub async fn refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> Result<impl IntoResponse, AppError> {
    let escrow = state.escrow.refund(id, req.resolved_by).await?;
    Ok(Json(escrow))
}

pub async fn get_by_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let escrow = state.escrow.get_by_transaction(transaction_id).await?;
    Ok(Json(escrow))
}
