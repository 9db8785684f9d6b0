//! Unread count REST handlers.

use super::handlers::{AppError, Envelope, HubState};
use crate::auth::Claims;
use crate::cards::ReadScope;
use crate::unread::UnreadCounts;
use axum::{extract::State, Extension, Json};
use serde::Deserialize;

/// GET /unread — per-team and per-conversation unread counts.
pub async fn get_unread(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Envelope<UnreadCounts>>, AppError> {
    let user = claims.user_id().map_err(|e| AppError::Auth(e.to_string()))?;
    let counts = state.unread.counts(user).await?;
    Ok(Json(Envelope { data: counts }))
}

/// Request body for POST /unread/read
#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    /// `{"kind": "team" | "conversation", "id": "<uuid>"}`
    pub scope: ReadScope,
}

/// POST /unread/read — advance the watermark for one scope to now.
///
/// Monotonic: a stale call from another device leaves the watermark where
/// it is. Returns the fresh counts either way.
pub async fn mark_read(
    State(state): State<HubState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<Envelope<UnreadCounts>>, AppError> {
    let user = claims.user_id().map_err(|e| AppError::Auth(e.to_string()))?;
    let counts = state.unread.mark_read(user, req.scope).await?;
    Ok(Json(Envelope { data: counts }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_mark_read_request_deserializes() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"scope":{{"kind":"team","id":"{id}"}}}}"#);
        let req: MarkReadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.scope, ReadScope::Team(id));

        let json = format!(r#"{{"scope":{{"kind":"conversation","id":"{id}"}}}}"#);
        let req: MarkReadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.scope, ReadScope::Conversation(id));
    }
}
