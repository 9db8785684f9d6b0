//! Card REST handlers: creation, feed, detail, and lifecycle actions.

use super::handlers::{AppError, Envelope, HubState, ListEnvelope};
use super::query::{decode_cursor, encode_cursor, FeedMeta, FeedParams};
use crate::auth::Claims;
use crate::cards::{Card, CardDraft, CardStatus, FeedFilter, Importance, Visibility};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn actor(claims: &Claims) -> Result<Uuid, AppError> {
    claims.user_id().map_err(|e| AppError::Auth(e.to_string()))
}

fn parse_due(due_at: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    due_at
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| {
                    AppError::Validation(format!("due date is not a valid RFC 3339 timestamp: {raw}"))
                })
        })
        .transpose()
}

fn parse_importance(raw: Option<&str>) -> Result<Importance, AppError> {
    match raw {
        Some(s) => s.parse().map_err(AppError::Validation),
        None => Ok(Importance::default()),
    }
}

// ============================================================================
// Creation
// ============================================================================

/// Request body for POST /cards/personal
#[derive(Debug, Deserialize)]
pub struct CreatePersonalRequest {
    pub body: String,
    pub summary: Option<String>,
    pub importance: Option<String>,
    pub due_at: Option<String>,
}

/// POST /cards/personal — create a private card for the sender only.
pub async fn create_personal(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePersonalRequest>,
) -> Result<(StatusCode, Json<Envelope<Card>>), AppError> {
    let sender = actor(&claims)?;
    let draft = CardDraft {
        body: req.body,
        summary: req.summary,
        importance: parse_importance(req.importance.as_deref())?,
        visibility: Visibility::Private,
        team_id: None,
        recipients: vec![],
        parent_id: None,
        due_at: parse_due(req.due_at.as_deref())?,
    };
    let card = state.service.create(sender, draft).await?;
    Ok((StatusCode::CREATED, Json(Envelope { data: card })))
}

/// Request body for POST /cards/team
#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub body: String,
    pub summary: Option<String>,
    pub importance: Option<String>,
    pub due_at: Option<String>,
    /// Team broadcast when set
    pub team_id: Option<Uuid>,
    /// Direct addressing when set (and no team)
    #[serde(default)]
    pub recipients: Vec<Uuid>,
    /// Threaded reply — addressing is inherited from the parent
    pub parent_id: Option<Uuid>,
}

/// POST /cards/team — create a team broadcast, a direct card, or a
/// threaded reply.
pub async fn create_team(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTeamRequest>,
) -> Result<(StatusCode, Json<Envelope<Card>>), AppError> {
    let sender = actor(&claims)?;

    let visibility = if req.parent_id.is_some() {
        // Inherited from the parent by the service; value here is unused
        Visibility::Direct
    } else if req.team_id.is_some() {
        Visibility::Team
    } else if !req.recipients.is_empty() {
        Visibility::Direct
    } else {
        return Err(AppError::Validation(
            "either team_id, recipients, or parent_id is required".into(),
        ));
    };

    let draft = CardDraft {
        body: req.body,
        summary: req.summary,
        importance: parse_importance(req.importance.as_deref())?,
        visibility,
        team_id: req.team_id,
        recipients: req.recipients,
        parent_id: req.parent_id,
        due_at: parse_due(req.due_at.as_deref())?,
    };
    let card = state.service.create(sender, draft).await?;
    Ok((StatusCode::CREATED, Json(Envelope { data: card })))
}

// ============================================================================
// Feed & detail
// ============================================================================

/// A feed entry: the card plus its current attention score.
#[derive(Debug, Serialize)]
pub struct FeedCard {
    #[serde(flatten)]
    pub card: Card,
    pub score: u8,
}

/// GET /cards/feed — paginated feed, newest first.
pub async fn feed(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<FeedParams>,
) -> Result<Json<ListEnvelope<Vec<FeedCard>, FeedMeta>>, AppError> {
    let user = actor(&claims)?;

    let statuses = params
        .status_list()
        .map(|list| {
            list.iter()
                .map(|s| s.parse::<CardStatus>())
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(AppError::Validation)?;

    let before = params
        .cursor
        .as_deref()
        .map(|c| decode_cursor(c).ok_or_else(|| AppError::Validation("invalid cursor".into())))
        .transpose()?;

    let now = Utc::now();
    let limit = params.validated_limit();
    let filter = FeedFilter {
        statuses,
        due_only: params.due,
        now: Some(now),
        before,
        limit,
    };

    let (cards, has_more) = state.service.feed(user, filter).await?;

    let cursor = if has_more {
        cards
            .last()
            .map(|card| encode_cursor(card.created_at, card.id))
    } else {
        None
    };

    let data = cards
        .into_iter()
        .map(|card| FeedCard {
            score: crate::cards::priority::score(card.importance, card.due_at, now),
            card,
        })
        .collect();

    Ok(Json(ListEnvelope {
        data,
        meta: FeedMeta { cursor, has_more },
    }))
}

/// GET /cards/{id} — card detail including responses, reactions, views,
/// and the context ledger.
pub async fn detail(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<crate::cards::CardDetail>>, AppError> {
    let user = actor(&claims)?;
    let detail = state.service.detail(id, user).await?;
    Ok(Json(Envelope { data: detail }))
}

// ============================================================================
// Lifecycle actions
// ============================================================================

/// Acknowledge / status-change response payload
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub status: CardStatus,
}

/// POST /cards/{id}/acknowledge — idempotent acknowledge.
pub async fn acknowledge(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<StatusResponse>>, AppError> {
    let user = actor(&claims)?;
    let card = state.service.acknowledge(id, user).await?;
    Ok(Json(Envelope {
        data: StatusResponse {
            success: true,
            status: card.status,
        },
    }))
}

/// Request body for POST /cards/{id}/respond
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub body: String,
}

/// POST /cards/{id}/respond — append a response.
pub async fn respond(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<RespondRequest>,
) -> Result<(StatusCode, Json<Envelope<crate::cards::CardResponse>>), AppError> {
    let user = actor(&claims)?;
    let response = state.service.respond(id, user, req.body).await?;
    Ok((StatusCode::CREATED, Json(Envelope { data: response })))
}

/// Request body for POST /cards/{id}/react
#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

/// POST /cards/{id}/react — append a reaction.
pub async fn react(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReactRequest>,
) -> Result<(StatusCode, Json<Envelope<crate::cards::Reaction>>), AppError> {
    let user = actor(&claims)?;
    let reaction = state.service.react(id, user, req.emoji).await?;
    Ok((StatusCode::CREATED, Json(Envelope { data: reaction })))
}

/// Request body for PATCH /cards/{id}
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// PATCH /cards/{id} — status transition.
pub async fn update_status(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Envelope<StatusResponse>>, AppError> {
    let user = actor(&claims)?;
    let new_status: CardStatus = req.status.parse().map_err(AppError::Validation)?;
    let card = state.service.update_status(id, user, new_status).await?;
    Ok(Json(Envelope {
        data: StatusResponse {
            success: true,
            status: card.status,
        },
    }))
}

/// Request body for POST /cards/{id}/snooze
#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    pub until: String,
}

/// Snooze response payload
#[derive(Debug, Serialize)]
pub struct SnoozeResponse {
    pub status: CardStatus,
    pub snoozed_until: DateTime<Utc>,
}

/// POST /cards/{id}/snooze — hide from "due now" views until the timestamp.
pub async fn snooze(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<SnoozeRequest>,
) -> Result<Json<Envelope<SnoozeResponse>>, AppError> {
    let user = actor(&claims)?;
    let until = DateTime::parse_from_rfc3339(&req.until)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            AppError::Validation(format!(
                "snooze timestamp is not a valid RFC 3339 timestamp: {}",
                req.until
            ))
        })?;
    let card = state.service.snooze(id, user, until).await?;
    Ok(Json(Envelope {
        data: SnoozeResponse {
            status: card.status,
            snoozed_until: until,
        },
    }))
}

// ============================================================================
// Tests
// ============================================================================
