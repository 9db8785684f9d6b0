//! Domain event types for live push notifications
//!
//! Events are reconciliation hints, not an authoritative log: clients
//! re-fetch feed/unread state on receipt rather than applying payloads
//! as truth.

use crate::cards::CardStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Who is entitled to receive an event.
///
/// Carries only the metadata fan-out needs — never a card body — so
/// entitlement checks stay O(connections).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventScope {
    /// Every member of the team
    Team { team_id: Uuid },
    /// The explicit participant set of a private/direct card
    Users { user_ids: Vec<Uuid> },
    /// A single user (unread deltas, multi-device convergence)
    User { user_id: Uuid },
}

impl EventScope {
    /// Whether `user` (with `teams` memberships) may receive this event.
    pub fn entitles(&self, user: Uuid, teams: &HashSet<Uuid>) -> bool {
        match self {
            Self::Team { team_id } => teams.contains(team_id),
            Self::Users { user_ids } => user_ids.contains(&user),
            Self::User { user_id } => *user_id == user,
        }
    }
}

/// The typed payload of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    NewCard {
        card_id: Uuid,
        thread_id: Uuid,
    },
    NewReply {
        /// The new reply card or response
        reply_id: Uuid,
        /// The card being replied to
        card_id: Uuid,
        thread_id: Uuid,
    },
    StatusChanged {
        card_id: Uuid,
        status: CardStatus,
    },
    UnreadChanged {
        user_id: Uuid,
        total: usize,
    },
}

/// A domain event emitted after a successful mutation.
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub scope: EventScope,
    /// ISO 8601 emission instant
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    fn new(payload: EventPayload, scope: EventScope) -> Self {
        Self {
            payload,
            scope,
            timestamp: Utc::now(),
        }
    }

    pub fn new_card(card_id: Uuid, thread_id: Uuid, scope: EventScope) -> Self {
        Self::new(EventPayload::NewCard { card_id, thread_id }, scope)
    }

    pub fn new_reply(reply_id: Uuid, card_id: Uuid, thread_id: Uuid, scope: EventScope) -> Self {
        Self::new(
            EventPayload::NewReply {
                reply_id,
                card_id,
                thread_id,
            },
            scope,
        )
    }

    pub fn status_changed(card_id: Uuid, status: CardStatus, scope: EventScope) -> Self {
        Self::new(EventPayload::StatusChanged { card_id, status }, scope)
    }

    pub fn unread_changed(user_id: Uuid, total: usize) -> Self {
        Self::new(
            EventPayload::UnreadChanged { user_id, total },
            EventScope::User { user_id },
        )
    }
}

/// Anything that can emit domain events after a mutation.
///
/// Fire-and-forget: implementations must never block or panic.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: DomainEvent);
}
