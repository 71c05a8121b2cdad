//! Connection registry: at most one live connection per identity.
//!
//! Both maps live under a single mutex; registry membership is the shared
//! mutable state, socket I/O is not. No lock is held across an await point,
//! so plain `std::sync::Mutex` is enough.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

use super::message::{ErrorPayload, MessageKind, RealtimeMessage, Role};

/// Handle the transport task drains into the actual socket. Dropping every
/// clone of the sender ends that task and closes the socket.
pub type ClientSender = mpsc::UnboundedSender<RealtimeMessage>;

pub struct Connection {
    pub connection_id: Uuid,
    pub identity_id: String,
    pub role: Role,
    sender: ClientSender,
    last_activity: Instant,
}

#[derive(Default)]
struct RegistryMaps {
    by_identity: HashMap<String, Uuid>,
    connections: HashMap<Uuid, Connection>,
}

pub struct ConnectionRegistry {
    maps: Mutex<RegistryMaps>,
    idle_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            maps: Mutex::new(RegistryMaps::default()),
            idle_timeout,
        }
    }

    /// Registers a connection for an identity. Last writer wins: any prior
    /// connection for the same identity is told why and force-closed, so
    /// opening the app on a new device never leaks the old socket.
    pub fn register(&self, connection_id: Uuid, identity_id: &str, role: Role, sender: ClientSender) {
        let evicted = {
            let mut maps = self.maps.lock().expect("registry mutex poisoned");
            let evicted = maps
                .by_identity
                .insert(identity_id.to_string(), connection_id)
                .and_then(|old_id| maps.connections.remove(&old_id));
            maps.connections.insert(
                connection_id,
                Connection {
                    connection_id,
                    identity_id: identity_id.to_string(),
                    role,
                    sender,
                    last_activity: Instant::now(),
                },
            );
            evicted
        };

        if let Some(old) = evicted {
            tracing::info!(
                identity = identity_id,
                old_connection = %old.connection_id,
                "replacing existing connection"
            );
            let notice = RealtimeMessage::system(MessageKind::Error(ErrorPayload {
                message: "connection replaced by a newer session".to_string(),
            }))
            .to(identity_id);
            let _ = old.sender.send(notice);
            // Dropping `old` drops the last sender clone held by the registry;
            // once the transport task's queue drains it closes the socket.
        }
    }

    /// Refreshes the idle clock for an identity. Returns false when the
    /// identity has no live connection (stale or unauthenticated sender).
    pub fn touch(&self, identity_id: &str) -> bool {
        let mut maps = self.maps.lock().expect("registry mutex poisoned");
        let Some(conn_id) = maps.by_identity.get(identity_id).copied() else {
            return false;
        };
        if let Some(conn) = maps.connections.get_mut(&conn_id) {
            conn.last_activity = Instant::now();
            true
        } else {
            false
        }
    }

    /// Removes by connection id, called on socket close or error. A stale id
    /// left over from an eviction is a no-op for the identity map.
    pub fn remove(&self, connection_id: Uuid) {
        let mut maps = self.maps.lock().expect("registry mutex poisoned");
        if let Some(conn) = maps.connections.remove(&connection_id) {
            if maps.by_identity.get(&conn.identity_id) == Some(&connection_id) {
                maps.by_identity.remove(&conn.identity_id);
            }
        }
    }

    pub fn is_connected(&self, identity_id: &str) -> bool {
        let maps = self.maps.lock().expect("registry mutex poisoned");
        maps.by_identity.contains_key(identity_id)
    }

    pub fn sender_for(&self, identity_id: &str) -> Option<ClientSender> {
        let maps = self.maps.lock().expect("registry mutex poisoned");
        let conn_id = maps.by_identity.get(identity_id)?;
        maps.connections.get(conn_id).map(|c| c.sender.clone())
    }

    pub fn senders_by_role(&self, role: Role) -> Vec<ClientSender> {
        let maps = self.maps.lock().expect("registry mutex poisoned");
        maps.connections
            .values()
            .filter(|c| c.role == role)
            .map(|c| c.sender.clone())
            .collect()
    }

    pub fn count_by_role(&self) -> HashMap<Role, usize> {
        let maps = self.maps.lock().expect("registry mutex poisoned");
        let mut counts = HashMap::new();
        for conn in maps.connections.values() {
            *counts.entry(conn.role).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.maps.lock().expect("registry mutex poisoned").connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts every connection idle beyond the timeout. The per-socket
    /// heartbeat ping runs on a shorter interval, so a healthy client's pong
    /// refreshes `last_activity` before this fires. Returns the evicted
    /// identities for logging and tests.
    pub fn sweep(&self) -> Vec<String> {
        let mut maps = self.maps.lock().expect("registry mutex poisoned");
        let now = Instant::now();
        let stale: Vec<Uuid> = maps
            .connections
            .values()
            .filter(|c| now.duration_since(c.last_activity) > self.idle_timeout)
            .map(|c| c.connection_id)
            .collect();

        let mut evicted = Vec::new();
        for conn_id in stale {
            if let Some(conn) = maps.connections.remove(&conn_id) {
                if maps.by_identity.get(&conn.identity_id) == Some(&conn_id) {
                    maps.by_identity.remove(&conn.identity_id);
                }
                evicted.push(conn.identity_id);
            }
        }
        evicted
    }

    /// Background idle sweep, independent of request traffic.
    pub async fn run_sweep(self: std::sync::Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = self.sweep();
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), ?evicted, "evicted idle connections");
            }
        }
    }
}
