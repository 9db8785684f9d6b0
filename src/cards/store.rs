//! CardStore trait definition
//!
//! The single seam over storage: every backend operation the card service,
//! unread aggregator, and live layer need. Two implementations exist —
//! `SqliteCardStore` (durable) and `MemoryCardStore` (ephemeral mode and
//! tests) — so callers never name a concrete backend.

use super::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Filters applied by the feed query. Pagination is keyset-based on
/// `(created_at, id)` descending.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    /// Restrict to these statuses. `deleted` cards are only returned when
    /// this explicitly names them.
    pub statuses: Option<Vec<CardStatus>>,
    /// "Due now" view: only cards with a due date, excluding cards snoozed
    /// past `now`.
    pub due_only: bool,
    /// Evaluation instant for the snooze check.
    pub now: Option<DateTime<Utc>>,
    /// Keyset cursor: return cards strictly older than this position.
    pub before: Option<(DateTime<Utc>, Uuid)>,
    /// Max rows to return.
    pub limit: usize,
}

impl FeedFilter {
    /// Whether `deleted` cards should appear at all.
    pub fn includes_deleted(&self) -> bool {
        self.statuses
            .as_ref()
            .is_some_and(|s| s.contains(&CardStatus::Deleted))
    }

    /// Whether `status` passes the filter.
    pub fn matches_status(&self, status: CardStatus) -> bool {
        match &self.statuses {
            Some(wanted) => wanted.contains(&status),
            None => status != CardStatus::Deleted,
        }
    }
}

/// Abstract interface for all card storage operations.
#[async_trait]
pub trait CardStore: Send + Sync {
    // ========================================================================
    // Cards
    // ========================================================================

    /// Persist a new card.
    async fn insert_card(&self, card: &Card) -> Result<()>;

    /// Fetch a card by id.
    async fn get_card(&self, id: Uuid) -> Result<Option<Card>>;

    /// Overwrite a card's status (the service validates the transition).
    async fn set_status(&self, id: Uuid, status: CardStatus, at: DateTime<Utc>) -> Result<()>;

    /// Set the snooze timestamp.
    async fn set_snooze(&self, id: Uuid, until: DateTime<Utc>, at: DateTime<Utc>) -> Result<()>;

    /// Cards where `user` is sender, explicit recipient, or member of the
    /// owning team — newest first under the filter's keyset cursor.
    async fn feed(&self, user: Uuid, teams: &[Uuid], filter: &FeedFilter) -> Result<Vec<Card>>;

    // ========================================================================
    // Attachments (append-only)
    // ========================================================================

    /// Append a response.
    async fn add_response(&self, response: &CardResponse) -> Result<()>;

    /// All responses in submission order.
    async fn list_responses(&self, card_id: Uuid) -> Result<Vec<CardResponse>>;

    /// Append a reaction.
    async fn add_reaction(&self, reaction: &Reaction) -> Result<()>;

    /// All reactions in submission order.
    async fn list_reactions(&self, card_id: Uuid) -> Result<Vec<Reaction>>;

    /// Record a "seen by" view. Upsert per (card, viewer); newest wins.
    async fn record_view(&self, view: &CardView) -> Result<()>;

    /// All view records for a card.
    async fn list_views(&self, card_id: Uuid) -> Result<Vec<CardView>>;

    // ========================================================================
    // Context ledger (append-only, immutable)
    // ========================================================================

    /// Append one context layer.
    async fn append_context(&self, layer: &ContextLayer) -> Result<()>;

    /// All layers in capture order, auto-captured layer first.
    async fn list_context(&self, card_id: Uuid) -> Result<Vec<ContextLayer>>;

    // ========================================================================
    // Unread / watermarks
    // ========================================================================

    /// Count non-deleted cards in `scope` created strictly after `after`,
    /// excluding cards sent by `user`. `None` counts everything in scope.
    async fn count_after(
        &self,
        scope: &ReadScope,
        user: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<usize>;

    /// Thread ids of direct conversations `user` participates in.
    async fn user_conversations(&self, user: Uuid) -> Result<Vec<Uuid>>;

    /// Current watermark for `(user, scope)`.
    async fn watermark(&self, user: Uuid, scope: &ReadScope) -> Result<Option<DateTime<Utc>>>;

    /// Monotonic advance: moves the watermark to `at` only if `at` is newer.
    /// Returns whether the watermark actually moved.
    async fn advance_watermark(
        &self,
        user: Uuid,
        scope: &ReadScope,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    // ========================================================================
    // Directory (seeded at startup, read-only afterwards)
    // ========================================================================

    /// Insert or update a user.
    async fn upsert_user(&self, user: &User) -> Result<()>;

    /// Fetch a user by id.
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    /// Fetch a user by email.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Insert or update a team.
    async fn upsert_team(&self, team: &Team) -> Result<()>;

    /// Add a user to a team (idempotent).
    async fn add_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()>;

    /// Teams `user` belongs to.
    async fn user_teams(&self, user: Uuid) -> Result<Vec<Uuid>>;

    /// Members of `team`.
    async fn team_members(&self, team_id: Uuid) -> Result<Vec<Uuid>>;

    // ========================================================================
    // Health
    // ========================================================================

    /// Whether the backend is reachable.
    async fn health_check(&self) -> Result<bool>;
}
