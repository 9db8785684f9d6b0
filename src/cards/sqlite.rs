//! SQLite implementation of CardStore.
//!
//! One connection guarded by a `tokio::sync::Mutex`; statements are short
//! and synchronous, so no await ever happens while the lock is held.
//! Timestamps are stored as microseconds since the epoch, ids and enums
//! as their canonical text forms.

use super::models::*;
use super::store::{CardStore, FeedFilter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cards (
    id            TEXT PRIMARY KEY,
    sender_id     TEXT NOT NULL,
    body          TEXT NOT NULL,
    summary       TEXT,
    importance    TEXT NOT NULL,
    visibility    TEXT NOT NULL,
    status        TEXT NOT NULL,
    team_id       TEXT,
    parent_id     TEXT,
    thread_id     TEXT NOT NULL,
    due_at        INTEGER,
    snoozed_until INTEGER,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cards_thread ON cards(thread_id, created_at);
CREATE INDEX IF NOT EXISTS idx_cards_team ON cards(team_id, created_at);

CREATE TABLE IF NOT EXISTS card_recipients (
    card_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (card_id, user_id)
);

CREATE TABLE IF NOT EXISTS responses (
    id         TEXT PRIMARY KEY,
    card_id    TEXT NOT NULL,
    author_id  TEXT NOT NULL,
    body       TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_responses_card ON responses(card_id);

CREATE TABLE IF NOT EXISTS reactions (
    id         TEXT PRIMARY KEY,
    card_id    TEXT NOT NULL,
    actor_id   TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reactions_card ON reactions(card_id);

CREATE TABLE IF NOT EXISTS card_views (
    card_id   TEXT NOT NULL,
    viewer_id TEXT NOT NULL,
    viewed_at INTEGER NOT NULL,
    PRIMARY KEY (card_id, viewer_id)
);

CREATE TABLE IF NOT EXISTS context_layers (
    id          TEXT PRIMARY KEY,
    card_id     TEXT NOT NULL,
    kind        TEXT NOT NULL,
    content     TEXT NOT NULL,
    confidence  REAL,
    provenance  TEXT,
    captured_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_context_card ON context_layers(card_id);

CREATE TABLE IF NOT EXISTS watermarks (
    user_id   TEXT NOT NULL,
    scope     TEXT NOT NULL,
    last_read INTEGER NOT NULL,
    PRIMARY KEY (user_id, scope)
);

CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    email         TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL,
    password_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teams (
    id   TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS team_members (
    team_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (team_id, user_id)
);
";

/// Durable CardStore on SQLite.
pub struct SqliteCardStore {
    conn: Mutex<Connection>,
}

impl SqliteCardStore {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_recipients(conn: &Connection, card_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt =
            conn.prepare("SELECT user_id FROM card_recipients WHERE card_id = ?1 ORDER BY user_id")?;
        let rows = stmt.query_map(params![card_id.to_string()], |row| {
            parse_uuid(row.get::<_, String>(0)?)
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

// ============================================================================
// Row mapping helpers
// ============================================================================

fn conv_err(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, msg.into())
}

fn parse_uuid(s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| conv_err(format!("bad uuid {s}: {e}")))
}

fn parse_enum<T>(s: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    s.parse().map_err(conv_err)
}

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(v: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(v).ok_or_else(|| conv_err(format!("bad timestamp {v}")))
}

fn opt_micros(v: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    v.map(from_micros).transpose()
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: parse_uuid(row.get(0)?)?,
        sender_id: parse_uuid(row.get(1)?)?,
        body: row.get(2)?,
        summary: row.get(3)?,
        importance: parse_enum(row.get(4)?)?,
        visibility: parse_enum(row.get(5)?)?,
        status: parse_enum(row.get(6)?)?,
        team_id: row.get::<_, Option<String>>(7)?.map(parse_uuid).transpose()?,
        recipients: Vec::new(), // filled in by the caller
        parent_id: row.get::<_, Option<String>>(8)?.map(parse_uuid).transpose()?,
        thread_id: parse_uuid(row.get(9)?)?,
        due_at: opt_micros(row.get(10)?)?,
        snoozed_until: opt_micros(row.get(11)?)?,
        created_at: from_micros(row.get(12)?)?,
        updated_at: from_micros(row.get(13)?)?,
    })
}

const CARD_COLUMNS: &str = "c.id, c.sender_id, c.body, c.summary, c.importance, c.visibility, \
     c.status, c.team_id, c.parent_id, c.thread_id, c.due_at, c.snoozed_until, \
     c.created_at, c.updated_at";

#[async_trait]
impl CardStore for SqliteCardStore {
    // ========================================================================
    // Cards
    // ========================================================================

    async fn insert_card(&self, card: &Card) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO cards (id, sender_id, body, summary, importance, visibility, status, \
             team_id, parent_id, thread_id, due_at, snoozed_until, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                card.id.to_string(),
                card.sender_id.to_string(),
                card.body,
                card.summary,
                card.importance.to_string(),
                card.visibility.to_string(),
                card.status.to_string(),
                card.team_id.map(|t| t.to_string()),
                card.parent_id.map(|p| p.to_string()),
                card.thread_id.to_string(),
                card.due_at.map(micros),
                card.snoozed_until.map(micros),
                micros(card.created_at),
                micros(card.updated_at),
            ],
        )?;
        for recipient in &card.recipients {
            tx.execute(
                "INSERT OR IGNORE INTO card_recipients (card_id, user_id) VALUES (?1, ?2)",
                params![card.id.to_string(), recipient.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
        let conn = self.conn.lock().await;
        let card = conn
            .query_row(
                &format!("SELECT {CARD_COLUMNS} FROM cards c WHERE c.id = ?1"),
                params![id.to_string()],
                card_from_row,
            )
            .optional()?;
        match card {
            Some(mut card) => {
                card.recipients = Self::load_recipients(&conn, card.id)?;
                Ok(Some(card))
            }
            None => Ok(None),
        }
    }

    async fn set_status(&self, id: Uuid, status: CardStatus, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE cards SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), micros(at), id.to_string()],
        )?;
        Ok(())
    }

    async fn set_snooze(&self, id: Uuid, until: DateTime<Utc>, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE cards SET snoozed_until = ?1, updated_at = ?2 WHERE id = ?3",
            params![micros(until), micros(at), id.to_string()],
        )?;
        Ok(())
    }

    async fn feed(&self, user: Uuid, teams: &[Uuid], filter: &FeedFilter) -> Result<Vec<Card>> {
        let now = filter.now.unwrap_or_else(Utc::now);

        // Entitlement: sender, explicit recipient, or member of the owning
        // team. Team ids and numeric cursor values are inlined (uuids and
        // i64s render to fixed alphabets); user id and cursor id are bound.
        let mut sql = format!(
            "SELECT DISTINCT {CARD_COLUMNS} FROM cards c \
             LEFT JOIN card_recipients r ON r.card_id = c.id \
             WHERE (c.sender_id = ?1 OR r.user_id = ?1"
        );
        if !teams.is_empty() {
            let list = teams
                .iter()
                .map(|t| format!("'{}'", t))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" OR c.team_id IN ({list})"));
        }
        sql.push(')');

        match &filter.statuses {
            Some(statuses) if !statuses.is_empty() => {
                let list = statuses
                    .iter()
                    .map(|s| format!("'{}'", s))
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" AND c.status IN ({list})"));
            }
            _ => sql.push_str(" AND c.status != 'deleted'"),
        }

        if filter.due_only {
            sql.push_str(&format!(
                " AND c.due_at IS NOT NULL \
                 AND (c.snoozed_until IS NULL OR c.snoozed_until <= {})",
                micros(now)
            ));
        }

        let mut cursor_id = None;
        if let Some((ts, id)) = filter.before {
            let t = micros(ts);
            sql.push_str(&format!(
                " AND (c.created_at < {t} OR (c.created_at = {t} AND c.id < ?2))"
            ));
            cursor_id = Some(id.to_string());
        }

        sql.push_str(&format!(
            " ORDER BY c.created_at DESC, c.id DESC LIMIT {}",
            filter.limit
        ));

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let user_param = user.to_string();
        let mut cards = Vec::new();
        match cursor_id {
            Some(id) => {
                let rows = stmt.query_map(params![user_param, id], card_from_row)?;
                for row in rows {
                    cards.push(row?);
                }
            }
            None => {
                let rows = stmt.query_map(params![user_param], card_from_row)?;
                for row in rows {
                    cards.push(row?);
                }
            }
        }

        for card in &mut cards {
            card.recipients = Self::load_recipients(&conn, card.id)?;
        }
        Ok(cards)
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    async fn add_response(&self, response: &CardResponse) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO responses (id, card_id, author_id, body, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                response.id.to_string(),
                response.card_id.to_string(),
                response.author_id.to_string(),
                response.body,
                micros(response.created_at),
            ],
        )?;
        Ok(())
    }

    async fn list_responses(&self, card_id: Uuid) -> Result<Vec<CardResponse>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, card_id, author_id, body, created_at FROM responses \
             WHERE card_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![card_id.to_string()], |row| {
            Ok(CardResponse {
                id: parse_uuid(row.get(0)?)?,
                card_id: parse_uuid(row.get(1)?)?,
                author_id: parse_uuid(row.get(2)?)?,
                body: row.get(3)?,
                created_at: from_micros(row.get(4)?)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn add_reaction(&self, reaction: &Reaction) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO reactions (id, card_id, actor_id, emoji, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reaction.id.to_string(),
                reaction.card_id.to_string(),
                reaction.actor_id.to_string(),
                reaction.emoji,
                micros(reaction.created_at),
            ],
        )?;
        Ok(())
    }

    async fn list_reactions(&self, card_id: Uuid) -> Result<Vec<Reaction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, card_id, actor_id, emoji, created_at FROM reactions \
             WHERE card_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![card_id.to_string()], |row| {
            Ok(Reaction {
                id: parse_uuid(row.get(0)?)?,
                card_id: parse_uuid(row.get(1)?)?,
                actor_id: parse_uuid(row.get(2)?)?,
                emoji: row.get(3)?,
                created_at: from_micros(row.get(4)?)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn record_view(&self, view: &CardView) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO card_views (card_id, viewer_id, viewed_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(card_id, viewer_id) DO UPDATE SET viewed_at = excluded.viewed_at \
             WHERE excluded.viewed_at > card_views.viewed_at",
            params![
                view.card_id.to_string(),
                view.viewer_id.to_string(),
                micros(view.viewed_at),
            ],
        )?;
        Ok(())
    }

    async fn list_views(&self, card_id: Uuid) -> Result<Vec<CardView>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT card_id, viewer_id, viewed_at FROM card_views WHERE card_id = ?1",
        )?;
        let rows = stmt.query_map(params![card_id.to_string()], |row| {
            Ok(CardView {
                card_id: parse_uuid(row.get(0)?)?,
                viewer_id: parse_uuid(row.get(1)?)?,
                viewed_at: from_micros(row.get(2)?)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ========================================================================
    // Context ledger
    // ========================================================================

    async fn append_context(&self, layer: &ContextLayer) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO context_layers (id, card_id, kind, content, confidence, provenance, \
             captured_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                layer.id.to_string(),
                layer.card_id.to_string(),
                layer.kind.to_string(),
                layer.content,
                layer.confidence,
                layer.provenance.map(|p| p.to_string()),
                micros(layer.captured_at),
            ],
        )?;
        Ok(())
    }

    async fn list_context(&self, card_id: Uuid) -> Result<Vec<ContextLayer>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, card_id, kind, content, confidence, provenance, captured_at \
             FROM context_layers WHERE card_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![card_id.to_string()], |row| {
            Ok(ContextLayer {
                id: parse_uuid(row.get(0)?)?,
                card_id: parse_uuid(row.get(1)?)?,
                kind: parse_enum(row.get(2)?)?,
                content: row.get(3)?,
                confidence: row.get(4)?,
                provenance: row
                    .get::<_, Option<String>>(5)?
                    .map(parse_enum)
                    .transpose()?,
                captured_at: from_micros(row.get(6)?)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ========================================================================
    // Unread / watermarks
    // ========================================================================

    async fn count_after(
        &self,
        scope: &ReadScope,
        user: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let conn = self.conn.lock().await;
        let after_micros = after.map(micros).unwrap_or(i64::MIN);
        let count: i64 = match scope {
            ReadScope::Team(team) => conn.query_row(
                "SELECT COUNT(*) FROM cards WHERE team_id = ?1 AND sender_id != ?2 \
                 AND status != 'deleted' AND created_at > ?3",
                params![team.to_string(), user.to_string(), after_micros],
                |row| row.get(0),
            )?,
            ReadScope::Conversation(thread) => conn.query_row(
                "SELECT COUNT(*) FROM cards WHERE thread_id = ?1 AND visibility = 'direct' \
                 AND sender_id != ?2 AND status != 'deleted' AND created_at > ?3",
                params![thread.to_string(), user.to_string(), after_micros],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    async fn user_conversations(&self, user: Uuid) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT c.thread_id FROM cards c \
             LEFT JOIN card_recipients r ON r.card_id = c.id \
             WHERE c.visibility = 'direct' AND (c.sender_id = ?1 OR r.user_id = ?1) \
             ORDER BY c.thread_id",
        )?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            parse_uuid(row.get::<_, String>(0)?)
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn watermark(&self, user: Uuid, scope: &ReadScope) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let value: Option<i64> = conn
            .query_row(
                "SELECT last_read FROM watermarks WHERE user_id = ?1 AND scope = ?2",
                params![user.to_string(), scope.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(from_micros).transpose()?)
    }

    async fn advance_watermark(
        &self,
        user: Uuid,
        scope: &ReadScope,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "INSERT INTO watermarks (user_id, scope, last_read) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id, scope) DO UPDATE SET last_read = excluded.last_read \
             WHERE excluded.last_read > watermarks.last_read",
            params![user.to_string(), scope.to_string(), micros(at)],
        )?;
        Ok(changed > 0)
    }

    // ========================================================================
    // Directory
    // ========================================================================

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, email, name, password_hash) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET email = excluded.email, name = excluded.name, \
             password_hash = excluded.password_hash",
            params![
                user.id.to_string(),
                user.email,
                user.name,
                user.password_hash
            ],
        )?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT id, email, name, password_hash FROM users WHERE id = ?1",
                params![id.to_string()],
                user_from_row,
            )
            .optional()?)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT id, email, name, password_hash FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
            .optional()?)
    }

    async fn upsert_team(&self, team: &Team) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO teams (id, slug, name) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET slug = excluded.slug, name = excluded.name",
            params![team.id.to_string(), team.slug, team.name],
        )?;
        Ok(())
    }

    async fn add_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO team_members (team_id, user_id) VALUES (?1, ?2)",
            params![team_id.to_string(), user_id.to_string()],
        )?;
        Ok(())
    }

    async fn user_teams(&self, user: Uuid) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT team_id FROM team_members WHERE user_id = ?1 ORDER BY team_id")?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            parse_uuid(row.get::<_, String>(0)?)
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn team_members(&self, team_id: Uuid) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT user_id FROM team_members WHERE team_id = ?1 ORDER BY user_id")?;
        let rows = stmt.query_map(params![team_id.to_string()], |row| {
            parse_uuid(row.get::<_, String>(0)?)
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn health_check(&self) -> Result<bool> {
        let conn = self.conn.lock().await;
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(one == 1)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(row.get(0)?)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password_hash: row.get(3)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
