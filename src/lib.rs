//! tezhub
//!
//! Card ("tez") lifecycle and real-time delivery engine for team messaging:
//! - Card Store with an explicit state machine (SQLite or in-memory)
//! - Priority Engine ranking cards by importance and due-date proximity
//! - Append-only Context Ledger grounding each card
//! - Unread Aggregator over per-user read watermarks
//! - Live Sync Hub: WebSocket push with a reconciling polling fallback
//! - Session Guard: JWT access tokens + rotating refresh-token families

pub mod api;
pub mod auth;
pub mod cards;
pub mod events;
pub mod live;
pub mod unread;

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    /// Database section — if absent, the store is in-memory (ephemeral mode)
    pub database: Option<DatabaseYamlConfig>,
    /// Auth section — if absent, protected routes deny by default
    pub auth: Option<AuthConfig>,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Database configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseYamlConfig {
    /// SQLite file path
    pub path: String,
}

/// Authentication configuration.
///
/// Accounts and teams are seeded into the store at startup — directory
/// management beyond that is an external concern. The `password_hash`
/// field accepts either a bcrypt hash (`$2...`) or a plaintext password,
/// which is hashed at startup with a warning log.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// JWT signing secret (HS256, minimum 32 characters)
    pub jwt_secret: String,
    /// Access token lifetime in seconds (default: 900 = 15 min)
    #[serde(default = "default_access_expiry")]
    pub access_token_expiry_secs: u64,
    /// Refresh token lifetime in seconds (default: 604800 = 7 days)
    #[serde(default = "default_refresh_expiry")]
    pub refresh_token_expiry_secs: u64,
    /// Seeded accounts
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Seeded teams
    #[serde(default)]
    pub teams: Vec<TeamConfig>,
}

/// One seeded account
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub email: String,
    pub name: String,
    /// bcrypt hash or plaintext (hashed at startup if plaintext)
    pub password_hash: String,
    /// Team slugs this account belongs to
    #[serde(default)]
    pub teams: Vec<String>,
}

/// One seeded team
#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfig {
    pub slug: String,
    pub name: String,
}

fn default_access_expiry() -> u64 {
    900 // 15 minutes
}

fn default_refresh_expiry() -> u64 {
    604800 // 7 days
}

/// Deterministic user id from an email address.
pub fn user_id_for_email(email: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, email.as_bytes())
}

/// Deterministic team id from a slug.
pub fn team_id_for_slug(slug: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("team:{slug}").as_bytes())
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// SQLite path — None means in-memory (ephemeral mode)
    pub database_path: Option<String>,
    /// Auth config — None means deny-by-default
    pub auth_config: Option<AuthConfig>,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with
    /// env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. A missing file
    /// falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        Ok(Self {
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(yaml.server.port),
            database_path: std::env::var("DATABASE_PATH")
                .ok()
                .or(yaml.database.map(|d| d.path)),
            auth_config: yaml.auth,
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any
    /// failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

// ============================================================================
// State construction & server bootstrap
// ============================================================================

/// Build the shared server state: store, event bus, aggregator, service,
/// token families, live connection registry. Seeds the directory from the
/// auth config.
pub async fn build_state(config: &Config) -> Result<api::HubState> {
    let store: Arc<dyn cards::CardStore> = match &config.database_path {
        Some(path) => {
            tracing::info!(path = %path, "opening sqlite card store");
            Arc::new(cards::SqliteCardStore::open(path)?)
        }
        None => {
            tracing::info!("no database configured — using in-memory card store");
            Arc::new(cards::MemoryCardStore::new())
        }
    };

    if let Some(auth) = &config.auth_config {
        seed_directory(&store, auth).await?;
    }

    let event_bus = Arc::new(events::EventBus::default());
    let unread = Arc::new(unread::UnreadAggregator::new(
        store.clone(),
        event_bus.clone(),
    ));
    let service = Arc::new(cards::CardService::new(
        store.clone(),
        event_bus.clone(),
        unread.clone(),
    ));
    let token_families = Arc::new(auth::TokenFamilyStore::new(
        config
            .auth_config
            .as_ref()
            .map(|a| a.refresh_token_expiry_secs)
            .unwrap_or(default_refresh_expiry()),
    ));

    Ok(Arc::new(api::ServerState {
        service,
        unread,
        store,
        event_bus,
        connections: Arc::new(live::ConnectionRegistry::new()),
        token_families,
        auth_config: config.auth_config.clone(),
    }))
}

/// Seed users, teams, and memberships from the auth config.
async fn seed_directory(store: &Arc<dyn cards::CardStore>, auth: &AuthConfig) -> Result<()> {
    for team in &auth.teams {
        store
            .upsert_team(&cards::Team {
                id: team_id_for_slug(&team.slug),
                slug: team.slug.clone(),
                name: team.name.clone(),
            })
            .await?;
    }

    for account in &auth.accounts {
        let password_hash = if account.password_hash.starts_with("$2") {
            account.password_hash.clone()
        } else {
            tracing::warn!(
                email = %account.email,
                "plaintext password in config — hashing at startup, replace with a bcrypt hash"
            );
            bcrypt::hash(&account.password_hash, bcrypt::DEFAULT_COST)?
        };

        let user_id = user_id_for_email(&account.email);
        store
            .upsert_user(&cards::User {
                id: user_id,
                email: account.email.clone(),
                name: account.name.clone(),
                password_hash,
            })
            .await?;

        for slug in &account.teams {
            store.add_member(team_id_for_slug(slug), user_id).await?;
        }
    }

    tracing::info!(
        users = auth.accounts.len(),
        teams = auth.teams.len(),
        "directory seeded"
    );
    Ok(())
}

/// Start the HTTP + WebSocket server and run until shutdown.
pub async fn start_server(config: Config) -> Result<()> {
    let port = config.server_port;
    let state = build_state(&config).await?;
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("tezhub listening on port {}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
