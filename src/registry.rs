// ============================================================================
// Connection Manager
// ============================================================================
//
// Registry of live WebSocket connections. Registration happens only
// after admission succeeds, so everything in the map carries a verified
// identity and access scope. The broadcast router reads the registry on
// every publish; there is no cached snapshot to go stale.
//
// Unregister is idempotent: the heartbeat monitor, the delivery path
// and the socket task's cleanup can all race to remove the same
// connection, and only the first removal has any effect.

use crate::audit::{AuditEvent, SecurityMonitor};
use crate::message::ServerMessage;
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL};
use crate::tenant::{AccessScope, ConnectionType, TenantId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reason a connection left the registry. Forced closures produce an
/// audit event; a plain client disconnect does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnect,
    HeartbeatTimeout,
    PolicyViolation,
    RateLimited,
    DeliveryFailed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientDisconnect => "client_disconnect",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::PolicyViolation => "policy_violation",
            CloseReason::RateLimited => "rate_limited",
            CloseReason::DeliveryFailed => "delivery_failed",
            CloseReason::Shutdown => "shutdown",
        }
    }

    fn is_forced(&self) -> bool {
        !matches!(self, CloseReason::ClientDisconnect)
    }
}

/// Frames pushed to a connection's socket task.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerMessage),
    Ping,
    Close { reason: CloseReason },
}

/// A registered, admitted connection.
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub tenant: Option<TenantId>,
    pub scope: AccessScope,
    pub connection_type: ConnectionType,
    pub sender: mpsc::UnboundedSender<Outbound>,
    connected_at: Instant,
    last_heartbeat: Instant,
    missed_heartbeats: u32,
}

impl Connection {
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Snapshot of a connection used by the broadcast router. Holds a
/// sender clone so delivery does not hold the registry lock.
#[derive(Clone)]
pub struct DeliveryTarget {
    pub id: ConnectionId,
    pub user_id: String,
    pub tenant: Option<TenantId>,
    pub scope: AccessScope,
    pub sender: mpsc::UnboundedSender<Outbound>,
}

pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    monitor: Arc<SecurityMonitor>,
}

impl ConnectionManager {
    pub fn new(monitor: Arc<SecurityMonitor>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            monitor,
        }
    }

    pub async fn register(
        &self,
        user_id: &str,
        tenant: Option<TenantId>,
        scope: AccessScope,
        connection_type: ConnectionType,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> ConnectionId {
        let mut connections = self.connections.write().await;
        Self::insert_locked(&mut connections, user_id, tenant, scope, connection_type, sender)
    }

    /// Registers the connection only if the user currently holds fewer
    /// than `max_per_user` connections. The count and the insert happen
    /// under one write-lock acquisition, so two racing admissions for
    /// the same user cannot both slip under the cap.
    pub async fn register_if_under(
        &self,
        user_id: &str,
        max_per_user: usize,
        tenant: Option<TenantId>,
        scope: AccessScope,
        connection_type: ConnectionType,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Option<ConnectionId> {
        let mut connections = self.connections.write().await;
        let live = connections
            .values()
            .filter(|c| c.user_id == user_id)
            .count();
        if live >= max_per_user {
            return None;
        }
        Some(Self::insert_locked(
            &mut connections,
            user_id,
            tenant,
            scope,
            connection_type,
            sender,
        ))
    }

    fn insert_locked(
        connections: &mut HashMap<ConnectionId, Connection>,
        user_id: &str,
        tenant: Option<TenantId>,
        scope: AccessScope,
        connection_type: ConnectionType,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> ConnectionId {
        let id = ConnectionId::new();
        let now = Instant::now();
        connections.insert(
            id,
            Connection {
                id,
                user_id: user_id.to_string(),
                tenant,
                scope,
                connection_type,
                sender,
                connected_at: now,
                last_heartbeat: now,
                missed_heartbeats: 0,
            },
        );
        CONNECTIONS_TOTAL.inc();
        CONNECTIONS_ACTIVE.set(connections.len() as i64);

        tracing::info!(
            connection_id = %id,
            scope = scope.as_str(),
            connection_type = connection_type.as_str(),
            "Connection registered"
        );
        id
    }

    /// Removes a connection. Returns false if it was already gone; the
    /// audit event and close frame are only produced on the first call.
    pub async fn unregister(&self, id: ConnectionId, reason: CloseReason) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(&id);
            CONNECTIONS_ACTIVE.set(connections.len() as i64);
            removed
        };

        let Some(connection) = removed else {
            return false;
        };

        // Best effort: the socket task may already be gone.
        let _ = connection.sender.send(Outbound::Close { reason });

        tracing::info!(
            connection_id = %id,
            reason = reason.as_str(),
            connected_secs = connection.connected_for().as_secs(),
            "Connection closed"
        );

        if reason.is_forced() {
            let event = AuditEvent::connection_closed(
                &connection.user_id,
                connection.tenant,
                &id.to_string(),
                reason.as_str(),
            );
            if let Err(e) = self.monitor.record(event) {
                e.log();
            }
        }
        true
    }

    pub async fn touch_heartbeat(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(&id) {
            connection.last_heartbeat = Instant::now();
            connection.missed_heartbeats = 0;
        }
    }

    pub async fn active_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connections_for_user(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.user_id == user_id)
            .count()
    }

    /// Delivery targets for a broadcast. With a tenant filter, only
    /// connections admitted into that exact tenant are returned;
    /// without one, every live connection is.
    pub async fn delivery_targets(&self, tenant: Option<TenantId>) -> Vec<DeliveryTarget> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| match tenant {
                Some(t) => c.tenant == Some(t),
                None => true,
            })
            .map(|c| DeliveryTarget {
                id: c.id,
                user_id: c.user_id.clone(),
                tenant: c.tenant,
                scope: c.scope,
                sender: c.sender.clone(),
            })
            .collect()
    }

    /// Periodic heartbeat sweep. Connections that miss `max_missed`
    /// consecutive intervals are force-closed; the rest get a ping.
    pub fn spawn_heartbeat_monitor(
        self: Arc<Self>,
        interval: Duration,
        max_missed: u32,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut expired = Vec::new();
                {
                    let mut connections = self.connections.write().await;
                    for connection in connections.values_mut() {
                        if connection.last_heartbeat.elapsed() >= interval {
                            connection.missed_heartbeats += 1;
                        }
                        if connection.missed_heartbeats >= max_missed {
                            expired.push(connection.id);
                        } else {
                            let _ = connection.sender.send(Outbound::Ping);
                        }
                    }
                }
                for id in expired {
                    tracing::warn!(connection_id = %id, "Heartbeat timeout");
                    self.unregister(id, CloseReason::HeartbeatTimeout).await;
                }
            }
        })
    }
}
