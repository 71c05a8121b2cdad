pub mod escrows;
pub mod orders;
pub mod payments;
pub mod webhook;
pub mod ws;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use std::collections::HashMap;

use crate::AppState;

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    version: &'static str,
    connections: HashMap<String, usize>,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state
        .registry
        .count_by_role()
        .into_iter()
        .map(|(role, count)| (format!("{:?}", role).to_lowercase(), count))
        .collect();

    Json(HealthStatus {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections,
    })
}
