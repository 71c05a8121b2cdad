//! WebSocket transport: one send task and one receive task per live
//! connection (outbound queue drain + heartbeat ping, inbound parse/route).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::realtime::message::{ConnectionAckPayload, MessageKind};
use crate::realtime::{RealtimeMessage, Role};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Authenticated identity, established by the session layer upstream of
    /// this core.
    identity: String,
    role: Role,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if params.identity.is_empty() {
        tracing::warn!("websocket upgrade without identity");
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.identity, params.role))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: String, role: Role) {
    let (mut sink, mut stream) = socket.split();
    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<RealtimeMessage>();

    // Last-writer-wins: any previous connection for this identity is evicted.
    state.registry.register(connection_id, &identity, role, tx);
    tracing::info!(identity = %identity, connection = %connection_id, "websocket connected");

    let ack = RealtimeMessage::system(MessageKind::ConnectionAck(ConnectionAckPayload {
        connection_id: Some(connection_id),
        message: Some("connected".to_string()),
    }))
    .to(identity.clone());
    if let Some(sender) = state.registry.sender_for(&identity) {
        let _ = sender.send(ack);
    }

    // Outbound: drain the registry queue and keep the liveness ping going.
    // The queue closing means the registry evicted us.
    let heartbeat = state.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat_interval = tokio::time::interval(heartbeat);
        loop {
            tokio::select! {
                _ = heartbeat_interval.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                queued = rx.recv() => {
                    match queued {
                        Some(message) => {
                            let json = match serde_json::to_string(&message) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!(error = %e, "failed to serialize outbound frame");
                                    continue;
                                }
                            };
                            if sink.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    // Inbound: parse, enforce the authenticated sender, route.
    let router = state.router.clone();
    let registry = state.registry.clone();
    let inbound_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                Message::Text(text) => {
                    let message: RealtimeMessage = match serde_json::from_str(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(
                                identity = %inbound_identity,
                                error = %e,
                                "dropping malformed realtime frame"
                            );
                            continue;
                        }
                    };
                    if message.sender_id != inbound_identity {
                        tracing::warn!(
                            identity = %inbound_identity,
                            claimed = %message.sender_id,
                            "dropping frame with spoofed sender"
                        );
                        continue;
                    }
                    router.route(message);
                }
                Message::Pong(_) | Message::Ping(_) => {
                    registry.touch(&inbound_identity);
                }
                Message::Close(_) => {
                    tracing::debug!(identity = %inbound_identity, "client closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => { recv_task.abort(); }
        _ = (&mut recv_task) => { send_task.abort(); }
    }

    // Stale ids left over from an eviction are a no-op here.
    state.registry.remove(connection_id);
    tracing::info!(identity = %identity, connection = %connection_id, "websocket closed");
}
