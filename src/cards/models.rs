//! Card models and DTOs
//!
//! A card ("tez") is the unit of work/communication: free-text body,
//! optional summary and due date, an importance level, a visibility,
//! a lifecycle status, and an append-only trail of responses, reactions,
//! views and context layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Core Enums
// ============================================================================

/// Declared importance of a card, ordered `critical > urgent > high > medium > low`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Critical,
    Urgent,
    High,
    #[default]
    Medium,
    Low,
}

impl Importance {
    /// Base attention score contributed by the importance level alone.
    pub fn base_score(&self) -> u8 {
        match self {
            Self::Critical => 95,
            Self::Urgent => 85,
            Self::High => 70,
            Self::Medium => 50,
            Self::Low => 30,
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Urgent => write!(f, "urgent"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown importance level: {}", s)),
        }
    }
}

/// Who a card is addressed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only the sender sees the card (personal note / reminder)
    Private,
    /// Every member of the owning team sees the card
    Team,
    /// Only the explicit recipient list sees the card
    Direct,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => write!(f, "private"),
            Self::Team => write!(f, "team"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "team" => Ok(Self::Team),
            "direct" => Ok(Self::Direct),
            _ => Err(format!("Unknown visibility: {}", s)),
        }
    }
}

/// Lifecycle status of a card.
///
/// The forward chain is `pending → acknowledged → resolved`; `archived` and
/// `deleted` are terminal and reachable from any non-terminal status.
/// "Delete" is a status transition — the row is never physically removed.
/// Snoozing is NOT a status: it is the `snoozed_until` timer attribute.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    #[default]
    Pending,
    Acknowledged,
    Resolved,
    Archived,
    Deleted,
}

impl CardStatus {
    /// Position on the pending→acknowledged→resolved chain.
    /// Terminal side-statuses have no rank.
    fn chain_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Acknowledged => Some(1),
            Self::Resolved => Some(2),
            Self::Archived | Self::Deleted => None,
        }
    }

    /// Whether no further transition may leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Archived | Self::Deleted)
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// Forward-only on the chain (jumps allowed, e.g. pending→resolved),
    /// `archived`/`deleted` from any non-terminal status, nothing out of a
    /// terminal status, and no self-transition.
    pub fn can_transition_to(&self, to: CardStatus) -> bool {
        if self.is_terminal() || *self == to {
            return false;
        }
        match to {
            Self::Archived | Self::Deleted => true,
            _ => match (self.chain_rank(), to.chain_rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Resolved => write!(f, "resolved"),
            Self::Archived => write!(f, "archived"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for CardStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("Unknown card status: {}", s)),
        }
    }
}

// ============================================================================
// Context Ledger Enums
// ============================================================================

/// Kind of grounding material a context layer carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Background,
    Fact,
    Artifact,
    Relationship,
    Constraint,
    Hint,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Fact => write!(f, "fact"),
            Self::Artifact => write!(f, "artifact"),
            Self::Relationship => write!(f, "relationship"),
            Self::Constraint => write!(f, "constraint"),
            Self::Hint => write!(f, "hint"),
        }
    }
}

impl FromStr for LayerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "fact" => Ok(Self::Fact),
            "artifact" => Ok(Self::Artifact),
            "relationship" => Ok(Self::Relationship),
            "constraint" => Ok(Self::Constraint),
            "hint" => Ok(Self::Hint),
            _ => Err(format!("Unknown layer kind: {}", s)),
        }
    }
}

/// How a context layer's content was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Supplied verbatim by a participant
    Stated,
    /// Derived by the system from other signals
    Inferred,
    /// Confirmed against an external source
    Verified,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stated => write!(f, "stated"),
            Self::Inferred => write!(f, "inferred"),
            Self::Verified => write!(f, "verified"),
        }
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stated" => Ok(Self::Stated),
            "inferred" => Ok(Self::Inferred),
            "verified" => Ok(Self::Verified),
            _ => Err(format!("Unknown provenance: {}", s)),
        }
    }
}

// ============================================================================
// Card
// ============================================================================

/// The unit of work/communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub importance: Importance,
    pub visibility: Visibility,
    pub status: CardStatus,
    /// Owning team for `team` visibility
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<Uuid>,
    /// Explicit recipients for `direct` visibility (may supplement a team)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<Uuid>,
    /// Parent card for threaded replies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Root card of the thread — a root card's thread id is its own id
    pub thread_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Whether `user` has any relationship to this card: sender, explicit
    /// recipient, or (for team cards) member of the owning team.
    pub fn is_participant(&self, user: Uuid, user_teams: &[Uuid]) -> bool {
        if self.sender_id == user || self.recipients.contains(&user) {
            return true;
        }
        match (self.visibility, self.team_id) {
            (Visibility::Team, Some(team)) => user_teams.contains(&team),
            _ => false,
        }
    }

    /// Whether the card is hidden from "due now" views at `now`.
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| until > now)
    }
}

// ============================================================================
// Attachments
// ============================================================================

/// One response appended to a card. Never mutates card status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardResponse {
    pub id: Uuid,
    pub card_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One emoji reaction appended to a card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub card_id: Uuid,
    pub actor_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// A "seen by" record. One per (card, viewer); newest timestamp wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardView {
    pub card_id: Uuid,
    pub viewer_id: Uuid,
    pub viewed_at: DateTime<Utc>,
}

/// One immutable piece of grounding material attached to a card.
///
/// A card's context is the ordered sequence of all layers ever attached
/// to it — append-only, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLayer {
    pub id: Uuid,
    pub card_id: Uuid,
    pub kind: LayerKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    pub captured_at: DateTime<Utc>,
}

/// A card plus everything attached to it, as returned by the detail endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CardDetail {
    #[serde(flatten)]
    pub card: Card,
    pub responses: Vec<CardResponse>,
    pub reactions: Vec<Reaction>,
    pub views: Vec<CardView>,
    pub context: Vec<ContextLayer>,
}

// ============================================================================
// Directory (seeded from config, read-only for the core)
// ============================================================================

/// A known account. Identity is a v5 UUID derived from the email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// bcrypt hash; never serialized out
    #[serde(skip_serializing)]
    pub password_hash: String,
}

/// A team. Identity is a v5 UUID derived from the slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
}

// ============================================================================
// Read scopes (unread watermarks)
// ============================================================================

/// A scope a read watermark applies to: a team stream or one conversation
/// (thread). Watermarks only ever move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReadScope {
    Team(Uuid),
    Conversation(Uuid),
}

impl fmt::Display for ReadScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Team(id) => write!(f, "team:{}", id),
            Self::Conversation(id) => write!(f, "conversation:{}", id),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
