//! Credential endpoints: login, refresh rotation, logout.
//!
//! Accounts come from the seeded directory (config-defined); passwords are
//! verified against bcrypt hashes. A login starts a refresh-token family;
//! each refresh consumes one token and issues its successor; a replayed
//! token kills the whole family and forces re-authentication.

use super::handlers::{AppError, Envelope, HubState};
use crate::auth::{encode_jwt, family::RefreshError};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Request body for POST /auth/login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for POST /auth/refresh and /auth/logout
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Identity block returned with a token pair
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

/// An access/refresh token pair
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub user: UserInfo,
}

/// Simple success payload
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// POST /auth/login — verify credentials, start a token family.
pub async fn login(
    State(state): State<HubState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Envelope<TokenPair>>, AppError> {
    let config = state.auth_config.as_ref().ok_or_else(|| {
        AppError::Forbidden("Authentication not configured — access denied".to_string())
    })?;

    let user = state
        .store
        .get_user_by_email(&req.email)
        .await?
        .ok_or_else(|| AppError::Auth("invalid credentials".to_string()))?;

    let valid = bcrypt::verify(&req.password, &user.password_hash).unwrap_or(false);
    if !valid {
        warn!(email = %req.email, "login failed");
        return Err(AppError::Auth("invalid credentials".to_string()));
    }

    let access_token = encode_jwt(
        user.id,
        &user.email,
        &user.name,
        &config.jwt_secret,
        config.access_token_expiry_secs,
    )?;
    let refresh = state.token_families.issue(user.id);

    debug!(email = %user.email, family = %refresh.family_id, "login ok");
    Ok(Json(Envelope {
        data: TokenPair {
            access_token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: config.access_token_expiry_secs,
            user: UserInfo {
                id: user.id,
                email: user.email,
                name: user.name,
            },
        },
    }))
}

/// POST /auth/refresh — rotate the refresh token, issue a new access token.
///
/// A replayed (already-consumed) token invalidates the entire family; the
/// caller must re-authenticate.
pub async fn refresh(
    State(state): State<HubState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<Envelope<TokenPair>>, AppError> {
    let config = state.auth_config.as_ref().ok_or_else(|| {
        AppError::Forbidden("Authentication not configured — access denied".to_string())
    })?;

    let (user_id, rotated) = state
        .token_families
        .rotate(&req.refresh_token)
        .map_err(|e| match e {
            RefreshError::Replayed => {
                AppError::Auth("refresh token replayed — session revoked".to_string())
            }
            other => AppError::Auth(other.to_string()),
        })?;

    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::Auth("unknown user".to_string()))?;

    let access_token = encode_jwt(
        user.id,
        &user.email,
        &user.name,
        &config.jwt_secret,
        config.access_token_expiry_secs,
    )?;

    Ok(Json(Envelope {
        data: TokenPair {
            access_token,
            refresh_token: rotated.token,
            token_type: "Bearer".to_string(),
            expires_in: config.access_token_expiry_secs,
            user: UserInfo {
                id: user.id,
                email: user.email,
                name: user.name,
            },
        },
    }))
}

/// POST /auth/logout — revoke the whole token family.
pub async fn logout(
    State(state): State<HubState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<Envelope<SuccessResponse>>, AppError> {
    let known = state.token_families.revoke(&req.refresh_token);
    debug!(known, "logout");
    Ok(Json(Envelope {
        data: SuccessResponse { success: true },
    }))
}

// ============================================================================
// Tests
// ============================================================================
