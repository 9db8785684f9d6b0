//! Unread aggregation over per-user read watermarks.
//!
//! Derives per-team and per-conversation unread counts from the Card Store
//! and a `(user, scope)` watermark that only ever moves forward. `mark_read`
//! emits an `unread_changed` event so other connections of the same user
//! (multi-device) converge.

use crate::cards::{CardStore, CoreResult, ReadScope};
use crate::events::{DomainEvent, EventEmitter};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Unread count for one team stream.
#[derive(Debug, Clone, Serialize)]
pub struct TeamUnread {
    pub team_id: Uuid,
    pub unread: usize,
}

/// Unread count for one conversation (thread).
#[derive(Debug, Clone, Serialize)]
pub struct ConversationUnread {
    pub conversation_id: Uuid,
    pub unread: usize,
}

/// Per-scope unread counts for one user.
#[derive(Debug, Clone, Serialize)]
pub struct UnreadCounts {
    pub teams: Vec<TeamUnread>,
    pub conversations: Vec<ConversationUnread>,
    pub total: usize,
}

/// Derives unread counts and owns watermark movement.
pub struct UnreadAggregator {
    store: Arc<dyn CardStore>,
    emitter: Arc<dyn EventEmitter>,
}

impl UnreadAggregator {
    pub fn new(store: Arc<dyn CardStore>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self { store, emitter }
    }

    /// Unread counts for every team and conversation `user` belongs to.
    ///
    /// A missing watermark counts everything in scope; the user's own cards
    /// never count as unread.
    pub async fn counts(&self, user: Uuid) -> CoreResult<UnreadCounts> {
        let mut teams = Vec::new();
        for team_id in self.store.user_teams(user).await? {
            let scope = ReadScope::Team(team_id);
            let mark = self.store.watermark(user, &scope).await?;
            let unread = self.store.count_after(&scope, user, mark).await?;
            teams.push(TeamUnread { team_id, unread });
        }

        let mut conversations = Vec::new();
        for conversation_id in self.store.user_conversations(user).await? {
            let scope = ReadScope::Conversation(conversation_id);
            let mark = self.store.watermark(user, &scope).await?;
            let unread = self.store.count_after(&scope, user, mark).await?;
            conversations.push(ConversationUnread {
                conversation_id,
                unread,
            });
        }

        let total = teams.iter().map(|t| t.unread).sum::<usize>()
            + conversations.iter().map(|c| c.unread).sum::<usize>();

        Ok(UnreadCounts {
            teams,
            conversations,
            total,
        })
    }

    /// Total unread across all scopes — the payload hint for
    /// `unread_changed` events.
    pub async fn total(&self, user: Uuid) -> CoreResult<usize> {
        Ok(self.counts(user).await?.total)
    }

    /// Advance the watermark for `(user, scope)` to now.
    ///
    /// Monotonic: a concurrent call that lost the race (or a stale device)
    /// leaves the watermark untouched and emits nothing. On movement an
    /// `unread_changed` event converges the user's other devices.
    pub async fn mark_read(&self, user: Uuid, scope: ReadScope) -> CoreResult<UnreadCounts> {
        let moved = self
            .store
            .advance_watermark(user, &scope, Utc::now())
            .await?;

        let counts = self.counts(user).await?;
        if moved {
            self.emitter
                .emit(DomainEvent::unread_changed(user, counts.total));
        }
        Ok(counts)
    }
}

// ============================================================================
// Tests
// ============================================================================
