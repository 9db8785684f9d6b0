//! Process-local registry of open push channels.
//!
//! A `LiveConnection` exists only while its WebSocket task runs: created on
//! successful handshake, removed on disconnect, credential expiry without
//! renewal, or idle timeout. Never persisted — offline users simply have no
//! entry, and the hub does not buffer events for them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use uuid::Uuid;

/// One client's push channel, with the entitlement scopes computed at
/// handshake time.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    pub user_id: Uuid,
    /// Team memberships at handshake — the fan-out filter never re-fetches
    pub teams: HashSet<Uuid>,
    pub connected_at: DateTime<Utc>,
}

/// Registry of all live connections in this process.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, LiveConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection after a successful handshake.
    /// Returns the connection id used to deregister on close.
    pub fn register(&self, user_id: Uuid, teams: HashSet<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            LiveConnection {
                user_id,
                teams,
                connected_at: Utc::now(),
            },
        );
        id
    }

    /// Remove a connection (disconnect, expiry, idle timeout).
    pub fn remove(&self, id: Uuid) {
        self.connections.remove(&id);
    }

    /// Number of open connections in this process.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of open connections for one user (multi-device).
    pub fn user_connection_count(&self, user_id: Uuid) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .count()
    }
}
