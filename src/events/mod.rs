//! Domain event system for real-time push notifications
//!
//! This module provides:
//! - `DomainEvent` — typed events emitted after every card mutation
//! - `EventScope` — the entitlement metadata fan-out filters on
//! - `EventBus` — broadcast channel distributing events to live connections

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{DomainEvent, EventEmitter, EventPayload, EventScope};
