//! WebSocket push channel: `GET /events/subscribe`.
//!
//! Authentication happens BEFORE the upgrade (`?token=` query parameter or
//! Bearer header), so invalid credentials yield an HTTP 401 and no WS
//! connection is ever opened. On success the hub computes the user's
//! entitlement scopes once, registers a LiveConnection, and fans out
//! domain events whose scope entitles the user.
//!
//! The connection carries a hard deadline at the credential's expiry. The
//! client may renew in-band with `{"type":"refresh","refresh_token":...}`;
//! a successful rotation extends the deadline, expiry without renewal
//! closes the channel.

use super::handlers::{AppError, HubState};
use crate::auth::jwt::{decode_jwt, encode_jwt, Claims};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Ping cadence for dead-client detection.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Query parameters for the push handshake
#[derive(Debug, Deserialize, Default)]
pub struct SubscribeQuery {
    /// Bearer credential (alternative to the Authorization header)
    pub token: Option<String>,
}

/// Messages a client may send over the push channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Silent credential renewal using the rotating refresh token
    Refresh { refresh_token: String },
}

/// WebSocket upgrade handler for `GET /events/subscribe`.
pub async fn subscribe(
    ws: WebSocketUpgrade,
    State(state): State<HubState>,
    Query(query): Query<SubscribeQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let config = state.auth_config.as_ref().ok_or_else(|| {
        AppError::Forbidden("Authentication not configured — access denied".to_string())
    })?;

    let token = query
        .token
        .clone()
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|s| s.to_string())
        })
        .ok_or_else(|| AppError::Auth("missing bearer credential".to_string()))?;

    let claims = decode_jwt(&token, &config.jwt_secret)
        .map_err(|e| AppError::Auth(format!("invalid token: {e}")))?;
    let user_id = claims.user_id().map_err(|e| AppError::Auth(e.to_string()))?;

    // Entitlement scopes are computed once, at handshake
    let teams: HashSet<Uuid> = state
        .store
        .user_teams(user_id)
        .await?
        .into_iter()
        .collect();

    debug!(user = %user_id, teams = teams.len(), "push channel authenticated");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims, user_id, teams)))
}

/// Remaining lifetime of the credential.
fn expiry_in(claims: &Claims) -> Duration {
    let secs = (claims.exp - chrono::Utc::now().timestamp()).max(0) as u64;
    Duration::from_secs(secs)
}

/// One task per live connection.
async fn handle_socket(
    socket: WebSocket,
    state: HubState,
    claims: Claims,
    user_id: Uuid,
    teams: HashSet<Uuid>,
) {
    let Some(config) = state.auth_config.clone() else {
        return;
    };

    let connection_id = state.connections.register(user_id, teams.clone());
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut event_rx = state.event_bus.subscribe();

    let hello = serde_json::json!({
        "type": "hello",
        "connection_id": connection_id,
    });
    if ws_sender
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        state.connections.remove(connection_id);
        return;
    }

    // Hard deadline: credential expiry. Renewed in-band via Refresh.
    let mut expiry = Box::pin(tokio::time::sleep(expiry_in(&claims)));

    let mut ping_interval = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping_interval.tick().await;

    loop {
        tokio::select! {
            // Fan out domain events the user is entitled to see
            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        if !event.scope.entitles(user_id, &teams) {
                            continue;
                        }
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    debug!("push send failed, client disconnected");
                                    break;
                                }
                            }
                            Err(e) => warn!("failed to serialize domain event: {}", e),
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // A slow client only lags its own receiver; the poll
                        // fallback reconciles whatever was skipped
                        warn!(skipped = n, "push client lagged, skipping events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("event bus closed, shutting down push channel");
                        break;
                    }
                }
            }

            // Credential expired with no successful renewal → close
            _ = &mut expiry => {
                debug!(user = %user_id, "credential expired with no renewal — closing channel");
                let notice = serde_json::json!({
                    "type": "auth_error",
                    "code": "auth_error",
                    "message": "credential expired",
                });
                let _ = ws_sender.send(Message::Text(notice.to_string().into())).await;
                break;
            }

            // Periodic pings to detect dead clients
            _ = ping_interval.tick() => {
                if ws_sender.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!("ping failed, client disconnected");
                    break;
                }
            }

            // Client messages: renewal requests, pong, close
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Refresh { refresh_token }) => {
                                match renew(&state, &config, &refresh_token).await {
                                    Ok((json, lifetime)) => {
                                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                            break;
                                        }
                                        expiry.as_mut().reset(Instant::now() + lifetime);
                                        debug!(user = %user_id, "push credential renewed in-band");
                                    }
                                    Err(message) => {
                                        let notice = serde_json::json!({
                                            "type": "auth_error",
                                            "code": "auth_error",
                                            "message": message,
                                        });
                                        let _ = ws_sender
                                            .send(Message::Text(notice.to_string().into()))
                                            .await;
                                        break;
                                    }
                                }
                            }
                            Err(_) => {
                                // Unknown client chatter is ignored
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Client is alive
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("push client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("push channel error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.connections.remove(connection_id);
    debug!(user = %user_id, "push channel closed");
}

/// Rotate the refresh token and mint a fresh access token.
/// Returns the JSON frame for the client plus the new credential lifetime.
async fn renew(
    state: &HubState,
    config: &crate::AuthConfig,
    refresh_token: &str,
) -> Result<(String, Duration), String> {
    let (user_id, rotated) = state
        .token_families
        .rotate(refresh_token)
        .map_err(|e| e.to_string())?;

    let user = state
        .store
        .get_user(user_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "unknown user".to_string())?;

    let access_token = encode_jwt(
        user.id,
        &user.email,
        &user.name,
        &config.jwt_secret,
        config.access_token_expiry_secs,
    )
    .map_err(|e| e.to_string())?;

    let frame = serde_json::json!({
        "type": "token",
        "access_token": access_token,
        "refresh_token": rotated.token,
        "expires_in": config.access_token_expiry_secs,
    });
    Ok((
        frame.to_string(),
        Duration::from_secs(config.access_token_expiry_secs),
    ))
}

// ============================================================================
// Tests — pre-upgrade auth (no WS connection is opened on failure)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::test_state;
    use crate::auth::encode_jwt;
    use crate::AuthConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    const TEST_SECRET: &str = "test-secret-key-minimum-32-chars!!";

    fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: TEST_SECRET.to_string(),
            access_token_expiry_secs: 900,
            refresh_token_expiry_secs: 604800,
            accounts: vec![],
            teams: vec![],
        }
    }

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("host", "localhost")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    async fn ws_app(config: Option<AuthConfig>) -> (Router, crate::api::handlers::HubState) {
        let state = test_state(config).await;
        let app = Router::new()
            .route("/events/subscribe", get(subscribe))
            .with_state(state.clone());
        (app, state)
    }

    #[tokio::test]
    async fn test_missing_token_is_401_pre_upgrade() {
        let (app, state) = ws_app(Some(auth_config())).await;
        let resp = app.oneshot(upgrade_request("/events/subscribe")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.connections.count(), 0, "no connection registered");
    }

    #[tokio::test]
    async fn test_garbage_token_is_401_pre_upgrade() {
        let (app, state) = ws_app(Some(auth_config())).await;
        let resp = app
            .oneshot(upgrade_request("/events/subscribe?token=garbage"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.connections.count(), 0);
    }

    #[tokio::test]
    async fn test_valid_token_upgrades() {
        let (app, _state) = ws_app(Some(auth_config())).await;
        let token = encode_jwt(
            Uuid::new_v4(),
            "alice@example.com",
            "Alice",
            TEST_SECRET,
            900,
        )
        .unwrap();

        let resp = app
            .oneshot(upgrade_request(&format!("/events/subscribe?token={token}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    #[tokio::test]
    async fn test_no_auth_config_is_403() {
        let (app, _state) = ws_app(None).await;
        let resp = app.oneshot(upgrade_request("/events/subscribe")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_client_refresh_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"refresh","refresh_token":"abc"}"#).unwrap();
        match msg {
            ClientMessage::Refresh { refresh_token } => assert_eq!(refresh_token, "abc"),
        }
    }

    #[test]
    fn test_expiry_in_clamps_to_zero() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: "a@b.c".into(),
            name: "A".into(),
            iat: 0,
            exp: 0, // long past
        };
        assert_eq!(expiry_in(&claims), Duration::ZERO);
    }
}
