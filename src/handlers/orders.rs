//! Endpoints the order-side collaborators call to drive the broadcaster.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::domain::order::GeoPoint;
use crate::domain::OrderStatus;
use crate::error::AppError;
use crate::services::broadcast::{OrderUpdate, ProofRefs};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: OrderStatus,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub note: Option<String>,
    pub actor_id: String,
}

impl StatusBody {
    fn into_update(self, order_id: String) -> OrderUpdate {
        OrderUpdate {
            order_id,
            status: self.status,
            location: self.location,
            eta_minutes: self.eta_minutes,
            note: self.note,
            actor_id: self.actor_id,
        }
    }
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .broadcaster
        .order_status_changed(body.into_update(order_id))
        .await?;
    Ok(Json(order))
}

pub async fn update_kitchen_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .broadcaster
        .kitchen_status_changed(body.into_update(order_id))
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationBody {
    pub status: OrderStatus,
    pub actor_id: String,
    #[serde(default)]
    pub proof: ProofRefs,
}

pub async fn delivery_confirmation(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(body): Json<ConfirmationBody>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .broadcaster
        .delivery_confirmation(&order_id, body.status, &body.actor_id, body.proof)
        .await?;
    Ok(Json(order))
}
