//! Rotating refresh-token families with replay detection.
//!
//! A refresh token is an opaque 256-bit random value encoded as hex
//! (64 chars), stored **hashed** (SHA-256) — the raw token only exists in
//! transit. Each rotation consumes exactly one token and issues exactly one
//! successor in the same family. Presenting an already-consumed token
//! invalidates the entire family, which catches stolen/replayed refresh
//! credentials: after a replay, both the reused token and its already-issued
//! successor are dead.
//!
//! The store is an explicit injectable object held in server state — never
//! ambient global state — and `reset` clears it between test runs.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Generate a cryptographically random 256-bit token encoded as hex.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// Hash a raw token with SHA-256 and return the hex digest.
/// Only the hash is ever stored.
pub fn hash_token(raw_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Why a rotation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("unknown refresh token")]
    Unknown,
    #[error("refresh token expired")]
    Expired,
    #[error("refresh token replayed — family revoked")]
    Replayed,
    #[error("token family revoked")]
    FamilyRevoked,
}

/// A freshly issued refresh credential. The raw token goes to the client;
/// nothing but its hash stays behind.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedRefresh {
    pub family_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct TokenRecord {
    family_id: Uuid,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
    consumed: bool,
}

/// In-process store of refresh-token families.
pub struct TokenFamilyStore {
    ttl: Duration,
    /// token hash → record
    tokens: DashMap<String, TokenRecord>,
    /// families killed by replay detection or logout
    revoked_families: DashMap<Uuid, DateTime<Utc>>,
}

impl TokenFamilyStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            tokens: DashMap::new(),
            revoked_families: DashMap::new(),
        }
    }

    /// Start a new family for a fresh login.
    pub fn issue(&self, user_id: Uuid) -> IssuedRefresh {
        let family_id = Uuid::new_v4();
        self.insert_token(family_id, user_id)
    }

    /// Consume `raw_token` and issue its successor in the same family.
    ///
    /// Replay of a consumed token revokes the whole family before the error
    /// is returned, so the already-issued successor dies with it.
    pub fn rotate(&self, raw_token: &str) -> Result<(Uuid, IssuedRefresh), RefreshError> {
        let hash = hash_token(raw_token);

        let (family_id, user_id) = {
            let mut record = self.tokens.get_mut(&hash).ok_or(RefreshError::Unknown)?;

            if self.revoked_families.contains_key(&record.family_id) {
                return Err(RefreshError::FamilyRevoked);
            }
            if record.consumed {
                let family = record.family_id;
                drop(record);
                self.revoked_families.insert(family, Utc::now());
                tracing::warn!(family = %family, "refresh token replay detected — family revoked");
                return Err(RefreshError::Replayed);
            }
            if record.expires_at <= Utc::now() {
                return Err(RefreshError::Expired);
            }

            record.consumed = true;
            (record.family_id, record.user_id)
        };

        Ok((user_id, self.insert_token(family_id, user_id)))
    }

    /// Revoke the family `raw_token` belongs to (logout).
    /// Returns whether the token was known.
    pub fn revoke(&self, raw_token: &str) -> bool {
        let hash = hash_token(raw_token);
        match self.tokens.get(&hash) {
            Some(record) => {
                self.revoked_families.insert(record.family_id, Utc::now());
                true
            }
            None => false,
        }
    }

    /// Drop expired tokens and stale revocations.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.tokens.retain(|_, record| record.expires_at > now);
    }

    /// Clear everything — test lifecycle hook.
    pub fn reset(&self) {
        self.tokens.clear();
        self.revoked_families.clear();
    }

    fn insert_token(&self, family_id: Uuid, user_id: Uuid) -> IssuedRefresh {
        let token = generate_token();
        let expires_at = Utc::now() + self.ttl;
        self.tokens.insert(
            hash_token(&token),
            TokenRecord {
                family_id,
                user_id,
                expires_at,
                consumed: false,
            },
        );
        IssuedRefresh {
            family_id,
            token,
            expires_at,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
