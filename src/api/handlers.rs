//! Shared server state, error envelope, and health endpoint.

use crate::auth::TokenFamilyStore;
use crate::cards::{CardService, CardStore, CoreError};
use crate::events::EventBus;
use crate::live::ConnectionRegistry;
use crate::unread::UnreadAggregator;
use crate::AuthConfig;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

/// Shared server state
pub struct ServerState {
    pub service: Arc<CardService>,
    pub unread: Arc<UnreadAggregator>,
    pub store: Arc<dyn CardStore>,
    pub event_bus: Arc<EventBus>,
    pub connections: Arc<ConnectionRegistry>,
    pub token_families: Arc<TokenFamilyStore>,
    /// Auth config — None means deny-by-default
    pub auth_config: Option<AuthConfig>,
}

/// Shared hub state
pub type HubState = Arc<ServerState>;

// ============================================================================
// Response envelopes
// ============================================================================

/// Success envelope: `{"data": T}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Success envelope for list endpoints: `{"data": T, "meta": M}`
#[derive(Debug, Serialize)]
pub struct ListEnvelope<T, M> {
    pub data: T,
    pub meta: M,
}

// ============================================================================
// Error envelope
// ============================================================================

/// API error. Serializes as `{"error": {"code": ..., "message": ...}}` —
/// clients treat `code` as the contract and `message` as presentation-only.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Auth(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::Auth(_) => (StatusCode::UNAUTHORIZED, "auth_error"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let message = match self {
            Self::Validation(msg)
            | Self::Auth(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg) => msg,
            Self::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                e.to_string()
            }
        };

        let body = Json(serde_json::json!({
            "error": { "code": code, "message": message }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => AppError::Validation(msg),
            CoreError::Forbidden(msg) => AppError::Forbidden(msg),
            CoreError::NotFound(msg) => AppError::NotFound(msg),
            CoreError::Conflict(msg) => AppError::Conflict(msg),
            CoreError::Storage(e) => AppError::Internal(e),
        }
    }
}

// ============================================================================
// Health check
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    pub live_connections: usize,
}

/// Health check handler — verifies store connectivity and reports the
/// number of open push channels.
pub async fn health(State(state): State<HubState>) -> (StatusCode, Json<HealthResponse>) {
    let store_ok = state.store.health_check().await.unwrap_or(false);

    let (http_status, status) = if store_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: if store_ok {
                "connected".to_string()
            } else {
                "disconnected".to_string()
            },
            live_connections: state.connections.count(),
        }),
    )
}

// ============================================================================
// Test support
// ============================================================================

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::cards::MemoryCardStore;

    /// Build a HubState over an in-memory store.
    pub async fn test_state(auth_config: Option<AuthConfig>) -> HubState {
        let store: Arc<dyn CardStore> = Arc::new(MemoryCardStore::new());
        let event_bus = Arc::new(EventBus::default());
        let unread = Arc::new(UnreadAggregator::new(store.clone(), event_bus.clone()));
        let service = Arc::new(CardService::new(
            store.clone(),
            event_bus.clone(),
            unread.clone(),
        ));
        let token_families = Arc::new(TokenFamilyStore::new(
            auth_config
                .as_ref()
                .map(|c| c.refresh_token_expiry_secs)
                .unwrap_or(3600),
        ));

        Arc::new(ServerState {
            service,
            unread,
            store,
            event_bus,
            connections: Arc::new(ConnectionRegistry::new()),
            token_families,
            auth_config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_shape() {
        let response = AppError::NotFound("card gone".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_and_code_mapping() {
        let cases: Vec<(AppError, StatusCode, &str)> = vec![
            (
                AppError::Validation("x".into()),
                StatusCode::BAD_REQUEST,
                "validation_error",
            ),
            (
                AppError::Auth("x".into()),
                StatusCode::UNAUTHORIZED,
                "auth_error",
            ),
            (
                AppError::Forbidden("x".into()),
                StatusCode::FORBIDDEN,
                "forbidden",
            ),
            (
                AppError::NotFound("x".into()),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                AppError::Conflict("x".into()),
                StatusCode::CONFLICT,
                "conflict",
            ),
        ];
        for (err, status, code) in cases {
            let (s, c) = err.status_and_code();
            assert_eq!(s, status);
            assert_eq!(c, code);
        }
    }

    #[test]
    fn test_core_error_conversion() {
        let err: AppError = CoreError::Forbidden("no".into()).into();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err: AppError = CoreError::Validation("bad".into()).into();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
