//! In-memory implementation of CardStore.
//!
//! Backs ephemeral mode (no `database` section in config) and unit tests.
//! All collections are `tokio::sync::RwLock<HashMap>`; watermark advance
//! takes the write lock so concurrent multi-device `mark_read` stays
//! monotonic.

use super::models::*;
use super::store::{CardStore, FeedFilter};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory CardStore.
#[derive(Default)]
pub struct MemoryCardStore {
    cards: RwLock<HashMap<Uuid, Card>>,
    responses: RwLock<HashMap<Uuid, Vec<CardResponse>>>,
    reactions: RwLock<HashMap<Uuid, Vec<Reaction>>>,
    views: RwLock<HashMap<Uuid, Vec<CardView>>>,
    context: RwLock<HashMap<Uuid, Vec<ContextLayer>>>,
    watermarks: RwLock<HashMap<(Uuid, ReadScope), DateTime<Utc>>>,
    users: RwLock<HashMap<Uuid, User>>,
    teams: RwLock<HashMap<Uuid, Team>>,
    members: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl MemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CardStore for MemoryCardStore {
    // ========================================================================
    // Cards
    // ========================================================================

    async fn insert_card(&self, card: &Card) -> Result<()> {
        self.cards.write().await.insert(card.id, card.clone());
        Ok(())
    }

    async fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
        Ok(self.cards.read().await.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: CardStatus, at: DateTime<Utc>) -> Result<()> {
        if let Some(card) = self.cards.write().await.get_mut(&id) {
            card.status = status;
            card.updated_at = at;
        }
        Ok(())
    }

    async fn set_snooze(&self, id: Uuid, until: DateTime<Utc>, at: DateTime<Utc>) -> Result<()> {
        if let Some(card) = self.cards.write().await.get_mut(&id) {
            card.snoozed_until = Some(until);
            card.updated_at = at;
        }
        Ok(())
    }

    async fn feed(&self, user: Uuid, teams: &[Uuid], filter: &FeedFilter) -> Result<Vec<Card>> {
        let now = filter.now.unwrap_or_else(Utc::now);
        let cards = self.cards.read().await;

        let mut visible: Vec<Card> = cards
            .values()
            .filter(|c| c.is_participant(user, teams))
            .filter(|c| filter.matches_status(c.status))
            .filter(|c| !filter.due_only || (c.due_at.is_some() && !c.is_snoozed(now)))
            .filter(|c| match filter.before {
                Some((ts, id)) => (c.created_at, c.id) < (ts, id),
                None => true,
            })
            .cloned()
            .collect();

        visible.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        visible.truncate(filter.limit);
        Ok(visible)
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    async fn add_response(&self, response: &CardResponse) -> Result<()> {
        self.responses
            .write()
            .await
            .entry(response.card_id)
            .or_default()
            .push(response.clone());
        Ok(())
    }

    async fn list_responses(&self, card_id: Uuid) -> Result<Vec<CardResponse>> {
        Ok(self
            .responses
            .read()
            .await
            .get(&card_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_reaction(&self, reaction: &Reaction) -> Result<()> {
        self.reactions
            .write()
            .await
            .entry(reaction.card_id)
            .or_default()
            .push(reaction.clone());
        Ok(())
    }

    async fn list_reactions(&self, card_id: Uuid) -> Result<Vec<Reaction>> {
        Ok(self
            .reactions
            .read()
            .await
            .get(&card_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_view(&self, view: &CardView) -> Result<()> {
        let mut views = self.views.write().await;
        let entries = views.entry(view.card_id).or_default();
        match entries.iter_mut().find(|v| v.viewer_id == view.viewer_id) {
            Some(existing) => {
                if view.viewed_at > existing.viewed_at {
                    existing.viewed_at = view.viewed_at;
                }
            }
            None => entries.push(view.clone()),
        }
        Ok(())
    }

    async fn list_views(&self, card_id: Uuid) -> Result<Vec<CardView>> {
        Ok(self
            .views
            .read()
            .await
            .get(&card_id)
            .cloned()
            .unwrap_or_default())
    }

    // ========================================================================
    // Context ledger
    // ========================================================================

    async fn append_context(&self, layer: &ContextLayer) -> Result<()> {
        self.context
            .write()
            .await
            .entry(layer.card_id)
            .or_default()
            .push(layer.clone());
        Ok(())
    }

    async fn list_context(&self, card_id: Uuid) -> Result<Vec<ContextLayer>> {
        Ok(self
            .context
            .read()
            .await
            .get(&card_id)
            .cloned()
            .unwrap_or_default())
    }

    // ========================================================================
    // Unread / watermarks
    // ========================================================================

    async fn count_after(
        &self,
        scope: &ReadScope,
        user: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let cards = self.cards.read().await;
        let count = cards
            .values()
            .filter(|c| c.status != CardStatus::Deleted)
            .filter(|c| c.sender_id != user)
            .filter(|c| match scope {
                ReadScope::Team(team) => c.team_id == Some(*team),
                ReadScope::Conversation(thread) => {
                    c.thread_id == *thread && c.visibility == Visibility::Direct
                }
            })
            .filter(|c| match after {
                Some(mark) => c.created_at > mark,
                None => true,
            })
            .count();
        Ok(count)
    }

    async fn user_conversations(&self, user: Uuid) -> Result<Vec<Uuid>> {
        let cards = self.cards.read().await;
        let mut threads: Vec<Uuid> = cards
            .values()
            .filter(|c| c.visibility == Visibility::Direct)
            .filter(|c| c.sender_id == user || c.recipients.contains(&user))
            .map(|c| c.thread_id)
            .collect();
        threads.sort();
        threads.dedup();
        Ok(threads)
    }

    async fn watermark(&self, user: Uuid, scope: &ReadScope) -> Result<Option<DateTime<Utc>>> {
        Ok(self.watermarks.read().await.get(&(user, *scope)).copied())
    }

    async fn advance_watermark(
        &self,
        user: Uuid,
        scope: &ReadScope,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut marks = self.watermarks.write().await;
        match marks.get(&(user, *scope)) {
            Some(current) if *current >= at => Ok(false),
            _ => {
                marks.insert((user, *scope), at);
                Ok(true)
            }
        }
    }

    // ========================================================================
    // Directory
    // ========================================================================

    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.users.write().await.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn upsert_team(&self, team: &Team) -> Result<()> {
        self.teams.write().await.insert(team.id, team.clone());
        Ok(())
    }

    async fn add_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()> {
        self.members
            .write()
            .await
            .entry(team_id)
            .or_default()
            .insert(user_id);
        Ok(())
    }

    async fn user_teams(&self, user: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .filter(|(_, members)| members.contains(&user))
            .map(|(team, _)| *team)
            .collect())
    }

    async fn team_members(&self, team_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .members
            .read()
            .await
            .get(&team_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================
