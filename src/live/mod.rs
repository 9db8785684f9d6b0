//! Live synchronization layer.
//!
//! Server side: the `ConnectionRegistry` tracks open push channels and the
//! WebSocket handler fans domain events out to them (see
//! `api::ws_handlers`). Client side: `ReconcilePoller` bounds staleness
//! with a low-frequency reconciling poll, and `run_reconnect_loop`
//! implements the fixed-backoff reconnect policy.

pub mod connection;
pub mod poller;
pub mod reconnect;

pub use connection::{ConnectionRegistry, LiveConnection};
pub use poller::{ReconcilePoller, DEGRADED_POLL_INTERVAL, HEALTHY_POLL_INTERVAL};
pub use reconnect::{run_reconnect_loop, RECONNECT_DELAY};

use thiserror::Error;

/// Failures of the push channel itself. Never surfaced to API callers —
/// recovered locally by the reconnect loop plus the reconciling poll.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport reported closure (server restart, network drop)
    #[error("push channel closed")]
    Closed,
    /// The credential was rejected and renewal failed — do not retry
    #[error("credential rejected with no viable renewal")]
    Auth,
    /// Any other transport-level failure
    #[error("transport failure: {0}")]
    Io(String),
}
