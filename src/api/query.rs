//! Feed query parameters and the keyset pagination cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Max items per feed page.
pub const MAX_FEED_LIMIT: usize = 100;

/// Default items per feed page.
pub const DEFAULT_FEED_LIMIT: usize = 50;

/// Query parameters for `GET /cards/feed`.
#[derive(Debug, Deserialize, Default)]
pub struct FeedParams {
    /// Comma-separated status values, e.g. "pending,acknowledged"
    pub status: Option<String>,
    /// Max items to return (default 50, capped at 100)
    pub limit: Option<usize>,
    /// Opaque cursor from a previous page's meta
    pub cursor: Option<String>,
    /// "Due now" view: only cards with a due date, hiding snoozed ones
    #[serde(default)]
    pub due: bool,
}

impl FeedParams {
    /// Validated page size.
    pub fn validated_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_FEED_LIMIT).min(MAX_FEED_LIMIT)
    }

    /// Comma-separated statuses as a trimmed vec, if present.
    pub fn status_list(&self) -> Option<Vec<String>> {
        self.status.as_ref().map(|s| {
            s.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }
}

/// Pagination metadata returned with feed pages.
#[derive(Debug, Serialize)]
pub struct FeedMeta {
    /// Cursor for the next page, absent on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// Encode a keyset position as an opaque cursor string.
pub fn encode_cursor(created_at: DateTime<Utc>, id: Uuid) -> String {
    format!("{}:{}", created_at.timestamp_micros(), id)
}

/// Decode a cursor produced by [`encode_cursor`].
pub fn decode_cursor(cursor: &str) -> Option<(DateTime<Utc>, Uuid)> {
    let (micros, id) = cursor.split_once(':')?;
    let micros: i64 = micros.parse().ok()?;
    let created_at = DateTime::from_timestamp_micros(micros)?;
    let id = Uuid::parse_str(id).ok()?;
    Some((created_at, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_default_and_cap() {
        assert_eq!(FeedParams::default().validated_limit(), 50);
        let params = FeedParams {
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!(params.validated_limit(), 100);
        let params = FeedParams {
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(params.validated_limit(), 10);
    }

    #[test]
    fn test_status_list_parsing() {
        let params = FeedParams {
            status: Some("pending, acknowledged,, resolved ".into()),
            ..Default::default()
        };
        assert_eq!(
            params.status_list().unwrap(),
            vec!["pending", "acknowledged", "resolved"]
        );
        assert!(FeedParams::default().status_list().is_none());
    }

    #[test]
    fn test_cursor_roundtrip() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let cursor = encode_cursor(now, id);
        let (ts, back_id) = decode_cursor(&cursor).unwrap();
        assert_eq!(ts.timestamp_micros(), now.timestamp_micros());
        assert_eq!(back_id, id);
    }

    #[test]
    fn test_cursor_garbage_rejected() {
        assert!(decode_cursor("").is_none());
        assert!(decode_cursor("no-colon").is_none());
        assert!(decode_cursor("abc:def").is_none());
        assert!(decode_cursor("123:not-a-uuid").is_none());
    }
}
