//! API route definitions

use super::handlers::{self, HubState};
use super::{auth_handlers, card_handlers, context_handlers, unread_handlers, ws_handlers};
use crate::auth::middleware::require_auth;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: HubState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // ========================================================================
    // Protected surface — Bearer credential required
    // ========================================================================
    let protected = Router::new()
        // Cards
        .route("/cards/personal", post(card_handlers::create_personal))
        .route("/cards/team", post(card_handlers::create_team))
        .route("/cards/feed", get(card_handlers::feed))
        .route(
            "/cards/{id}",
            get(card_handlers::detail).patch(card_handlers::update_status),
        )
        .route("/cards/{id}/acknowledge", post(card_handlers::acknowledge))
        .route("/cards/{id}/respond", post(card_handlers::respond))
        .route("/cards/{id}/react", post(card_handlers::react))
        .route("/cards/{id}/snooze", post(card_handlers::snooze))
        // Context ledger
        .route(
            "/cards/{id}/context",
            get(context_handlers::list_context).post(context_handlers::append_context),
        )
        // Unread
        .route("/unread", get(unread_handlers::get_unread))
        .route("/unread/read", post(unread_handlers::mark_read))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Credentials
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/refresh", post(auth_handlers::refresh))
        .route("/auth/logout", post(auth_handlers::logout))
        // Live push channel (credential validated pre-upgrade)
        .route("/events/subscribe", get(ws_handlers::subscribe))
        .merge(protected)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
