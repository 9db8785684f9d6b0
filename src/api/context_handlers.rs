//! Context ledger REST handlers.

use super::handlers::{AppError, Envelope, HubState};
use crate::auth::Claims;
use crate::cards::{ContextLayer, LayerKind, Provenance};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

/// Request body for POST /cards/{id}/context
#[derive(Debug, Deserialize)]
pub struct AppendContextRequest {
    pub kind: String,
    pub content: String,
    pub confidence: Option<f64>,
    pub provenance: Option<String>,
}

/// POST /cards/{id}/context — append one immutable context layer.
pub async fn append_context(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<AppendContextRequest>,
) -> Result<(StatusCode, Json<Envelope<ContextLayer>>), AppError> {
    let user = claims.user_id().map_err(|e| AppError::Auth(e.to_string()))?;

    let kind: LayerKind = req.kind.parse().map_err(AppError::Validation)?;
    let provenance: Option<Provenance> = req
        .provenance
        .as_deref()
        .map(|p| p.parse().map_err(AppError::Validation))
        .transpose()?;

    let layer = state
        .service
        .append_context(id, user, kind, req.content, req.confidence, provenance)
        .await?;
    Ok((StatusCode::CREATED, Json(Envelope { data: layer })))
}

/// Query parameters for GET /cards/{id}/context
#[derive(Debug, Deserialize, Default)]
pub struct ContextQuery {
    /// Explicit scope: only the most recent N layers. Without it the full
    /// ordered ledger is returned — layers are never dropped implicitly.
    pub last: Option<usize>,
}

/// GET /cards/{id}/context — the ordered layer set, auto-captured first.
/// This is the grounding evidence a downstream answerer may cite.
pub async fn list_context(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<Envelope<Vec<ContextLayer>>>, AppError> {
    let user = claims.user_id().map_err(|e| AppError::Auth(e.to_string()))?;
    let layers = state.service.context(id, user, query.last).await?;
    Ok(Json(Envelope { data: layers }))
}
