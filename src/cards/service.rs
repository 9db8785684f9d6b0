//! Card service — the mutation handler over the Card Store.
//!
//! Every mutation validates input and entitlement, writes the store, then
//! (a) recomputes affected unread totals via the Unread Aggregator and
//! (b) emits a typed event into the event bus. Read paths (feed, detail,
//! context) never emit.

use super::models::*;
use super::store::{CardStore, FeedFilter};
use super::{CoreError, CoreResult};
use crate::events::{DomainEvent, EventEmitter, EventScope};
use crate::unread::UnreadAggregator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Input for card creation. Visibility-specific fields are validated in
/// [`CardService::create`].
#[derive(Debug, Clone)]
pub struct CardDraft {
    pub body: String,
    pub summary: Option<String>,
    pub importance: Importance,
    pub visibility: Visibility,
    pub team_id: Option<Uuid>,
    pub recipients: Vec<Uuid>,
    pub parent_id: Option<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
}

/// High-level card operations: state machine, context ledger, feed.
pub struct CardService {
    store: Arc<dyn CardStore>,
    emitter: Arc<dyn EventEmitter>,
    unread: Arc<UnreadAggregator>,
}

/// Current instant truncated to microseconds — the precision the keyset
/// cursor and the SQLite store carry, so pagination stays exact across
/// backends.
fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

impl CardService {
    pub fn new(
        store: Arc<dyn CardStore>,
        emitter: Arc<dyn EventEmitter>,
        unread: Arc<UnreadAggregator>,
    ) -> Self {
        Self {
            store,
            emitter,
            unread,
        }
    }

    pub fn store(&self) -> &Arc<dyn CardStore> {
        &self.store
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create a card in `pending`, auto-attaching one context layer that
    /// captures the original raw input.
    ///
    /// A draft with `parent_id` is a threaded reply: the parent must exist,
    /// the sender must be one of its participants, and the reply inherits
    /// the parent's thread, visibility and addressing.
    pub async fn create(&self, sender: Uuid, draft: CardDraft) -> CoreResult<Card> {
        let body = draft.body.trim().to_string();
        if body.is_empty() {
            return Err(CoreError::Validation("card body must not be empty".into()));
        }

        let now = now_micros();
        let id = Uuid::new_v4();

        let card = match draft.parent_id {
            Some(parent_id) => {
                let (parent, _) = self.load_for(parent_id, sender).await?;
                Card {
                    id,
                    sender_id: sender,
                    body: body.clone(),
                    summary: draft.summary,
                    importance: draft.importance,
                    visibility: parent.visibility,
                    status: CardStatus::Pending,
                    team_id: parent.team_id,
                    recipients: parent.recipients.clone(),
                    parent_id: Some(parent.id),
                    thread_id: parent.thread_id,
                    due_at: draft.due_at,
                    snoozed_until: None,
                    created_at: now,
                    updated_at: now,
                }
            }
            None => {
                match draft.visibility {
                    Visibility::Team if draft.team_id.is_none() => {
                        return Err(CoreError::Validation(
                            "team cards require a team_id".into(),
                        ));
                    }
                    Visibility::Direct if draft.recipients.is_empty() => {
                        return Err(CoreError::Validation(
                            "direct cards require at least one recipient".into(),
                        ));
                    }
                    _ => {}
                }
                Card {
                    id,
                    sender_id: sender,
                    body: body.clone(),
                    summary: draft.summary,
                    importance: draft.importance,
                    visibility: draft.visibility,
                    status: CardStatus::Pending,
                    team_id: draft.team_id,
                    recipients: draft.recipients,
                    parent_id: None,
                    thread_id: id,
                    due_at: draft.due_at,
                    snoozed_until: None,
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        self.store.insert_card(&card).await?;
        self.store
            .append_context(&ContextLayer {
                id: Uuid::new_v4(),
                card_id: card.id,
                kind: LayerKind::Background,
                content: body,
                confidence: None,
                provenance: Some(Provenance::Stated),
                captured_at: now,
            })
            .await?;

        debug!(card_id = %card.id, thread_id = %card.thread_id, "card created");

        let scope = self.scope_for(&card);
        let event = match card.parent_id {
            Some(parent_id) => DomainEvent::new_reply(card.id, parent_id, card.thread_id, scope),
            None => DomainEvent::new_card(card.id, card.thread_id, scope),
        };
        self.emitter.emit(event);
        self.notify_unread(&card).await;

        Ok(card)
    }

    /// Acknowledge a card. Idempotent: a card already acknowledged or
    /// further along is returned unchanged and emits nothing.
    pub async fn acknowledge(&self, card_id: Uuid, actor: Uuid) -> CoreResult<Card> {
        let (mut card, _) = self.load_for(card_id, actor).await?;
        let now = Utc::now();

        self.store
            .record_view(&CardView {
                card_id,
                viewer_id: actor,
                viewed_at: now,
            })
            .await?;

        if !card.status.can_transition_to(CardStatus::Acknowledged) {
            return Ok(card);
        }

        self.store
            .set_status(card_id, CardStatus::Acknowledged, now)
            .await?;
        card.status = CardStatus::Acknowledged;
        card.updated_at = now;

        let scope = self.scope_for(&card);
        self.emitter
            .emit(DomainEvent::status_changed(card_id, card.status, scope));
        Ok(card)
    }

    /// Append a response. Never changes status; any number of responses
    /// from any entitled actor are allowed.
    pub async fn respond(&self, card_id: Uuid, actor: Uuid, body: String) -> CoreResult<CardResponse> {
        let trimmed = body.trim().to_string();
        if trimmed.is_empty() {
            return Err(CoreError::Validation(
                "response body must not be empty".into(),
            ));
        }
        let (card, _) = self.load_for(card_id, actor).await?;

        let response = CardResponse {
            id: Uuid::new_v4(),
            card_id,
            author_id: actor,
            body: trimmed,
            created_at: Utc::now(),
        };
        self.store.add_response(&response).await?;

        let scope = self.scope_for(&card);
        self.emitter.emit(DomainEvent::new_reply(
            response.id,
            card_id,
            card.thread_id,
            scope,
        ));
        Ok(response)
    }

    /// Append an emoji reaction. No status change, no unread impact.
    pub async fn react(&self, card_id: Uuid, actor: Uuid, emoji: String) -> CoreResult<Reaction> {
        let trimmed = emoji.trim().to_string();
        if trimmed.is_empty() || trimmed.chars().count() > 8 {
            return Err(CoreError::Validation("invalid reaction emoji".into()));
        }
        let (_card, _) = self.load_for(card_id, actor).await?;

        let reaction = Reaction {
            id: Uuid::new_v4(),
            card_id,
            actor_id: actor,
            emoji: trimmed,
            created_at: Utc::now(),
        };
        self.store.add_reaction(&reaction).await?;
        Ok(reaction)
    }

    /// Transition the card's status. Only participants may transition;
    /// illegal transitions are rejected. Terminal statuses stay queryable.
    pub async fn update_status(
        &self,
        card_id: Uuid,
        actor: Uuid,
        new_status: CardStatus,
    ) -> CoreResult<Card> {
        let (mut card, _) = self.load_for(card_id, actor).await?;

        if !card.status.can_transition_to(new_status) {
            return Err(CoreError::Validation(format!(
                "illegal status transition: {} -> {}",
                card.status, new_status
            )));
        }

        let now = Utc::now();
        self.store.set_status(card_id, new_status, now).await?;
        card.status = new_status;
        card.updated_at = now;

        debug!(card_id = %card_id, status = %new_status, "card status changed");
        let scope = self.scope_for(&card);
        self.emitter
            .emit(DomainEvent::status_changed(card_id, new_status, scope));
        Ok(card)
    }

    /// Set the snooze timer. `until` must be strictly in the future.
    /// Status is untouched — the card merely leaves "due now" views.
    pub async fn snooze(
        &self,
        card_id: Uuid,
        actor: Uuid,
        until: DateTime<Utc>,
    ) -> CoreResult<Card> {
        let now = Utc::now();
        if until <= now {
            return Err(CoreError::Validation(
                "snooze timestamp must be in the future".into(),
            ));
        }
        let (mut card, _) = self.load_for(card_id, actor).await?;
        self.store.set_snooze(card_id, until, now).await?;
        card.snoozed_until = Some(until);
        card.updated_at = now;
        Ok(card)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Paginated feed for `user`. Returns the page plus a `has_more` flag;
    /// an empty page is valid, not an error.
    pub async fn feed(&self, user: Uuid, mut filter: FeedFilter) -> CoreResult<(Vec<Card>, bool)> {
        let teams = self.store.user_teams(user).await?;
        let requested = filter.limit;
        filter.limit = requested + 1;

        let mut cards = self.store.feed(user, &teams, &filter).await?;
        let has_more = cards.len() > requested;
        cards.truncate(requested);
        Ok((cards, has_more))
    }

    /// Card detail including responses in submission order. Records a view
    /// for the reading actor.
    pub async fn detail(&self, card_id: Uuid, actor: Uuid) -> CoreResult<CardDetail> {
        let (card, _) = self.load_for(card_id, actor).await?;

        self.store
            .record_view(&CardView {
                card_id,
                viewer_id: actor,
                viewed_at: Utc::now(),
            })
            .await?;

        Ok(CardDetail {
            responses: self.store.list_responses(card_id).await?,
            reactions: self.store.list_reactions(card_id).await?,
            views: self.store.list_views(card_id).await?,
            context: self.store.list_context(card_id).await?,
            card,
        })
    }

    // ========================================================================
    // Context ledger
    // ========================================================================

    /// Append one immutable context layer.
    pub async fn append_context(
        &self,
        card_id: Uuid,
        actor: Uuid,
        kind: LayerKind,
        content: String,
        confidence: Option<f64>,
        provenance: Option<Provenance>,
    ) -> CoreResult<ContextLayer> {
        let trimmed = content.trim().to_string();
        if trimmed.is_empty() {
            return Err(CoreError::Validation(
                "context layer content must not be empty".into(),
            ));
        }
        if let Some(c) = confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(CoreError::Validation(
                    "confidence must be within [0, 1]".into(),
                ));
            }
        }
        self.load_for(card_id, actor).await?;

        let layer = ContextLayer {
            id: Uuid::new_v4(),
            card_id,
            kind,
            content: trimmed,
            confidence,
            provenance,
            captured_at: Utc::now(),
        };
        self.store.append_context(&layer).await?;
        Ok(layer)
    }

    /// The ordered layer set — the exclusive evidence a downstream answerer
    /// may cite. Layers are never ranked or dropped implicitly; a caller
    /// that wants fewer must pass an explicit `last_n` scope.
    pub async fn context(
        &self,
        card_id: Uuid,
        actor: Uuid,
        last_n: Option<usize>,
    ) -> CoreResult<Vec<ContextLayer>> {
        self.load_for(card_id, actor).await?;
        let mut layers = self.store.list_context(card_id).await?;
        if let Some(n) = last_n {
            let skip = layers.len().saturating_sub(n);
            layers.drain(..skip);
        }
        Ok(layers)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Fetch the card and verify `actor` is a participant.
    async fn load_for(&self, card_id: Uuid, actor: Uuid) -> CoreResult<(Card, Vec<Uuid>)> {
        let card = self
            .store
            .get_card(card_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("card {card_id} not found")))?;

        let actor_teams = self.store.user_teams(actor).await?;
        if !card.is_participant(actor, &actor_teams) {
            return Err(CoreError::Forbidden(
                "actor has no relationship to this card".into(),
            ));
        }
        Ok((card, actor_teams))
    }

    /// Entitlement scope for fan-out — metadata only, never the card body.
    fn scope_for(&self, card: &Card) -> EventScope {
        match (card.visibility, card.team_id) {
            (Visibility::Team, Some(team_id)) => EventScope::Team { team_id },
            _ => {
                let mut user_ids = card.recipients.clone();
                if !user_ids.contains(&card.sender_id) {
                    user_ids.push(card.sender_id);
                }
                EventScope::Users { user_ids }
            }
        }
    }

    /// Recompute unread totals for everyone the card just became visible
    /// to (minus the sender) and emit one `unread_changed` per user.
    async fn notify_unread(&self, card: &Card) {
        let affected: Vec<Uuid> = match (card.visibility, card.team_id) {
            (Visibility::Team, Some(team_id)) => match self.store.team_members(team_id).await {
                Ok(members) => members,
                Err(e) => {
                    debug!(error = %e, "skipping unread notification");
                    return;
                }
            },
            _ => card.recipients.clone(),
        };

        for user in affected.into_iter().filter(|u| *u != card.sender_id) {
            match self.unread.total(user).await {
                Ok(total) => self.emitter.emit(DomainEvent::unread_changed(user, total)),
                Err(e) => debug!(user = %user, error = %e, "unread recompute failed"),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
