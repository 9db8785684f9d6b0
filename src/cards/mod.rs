//! Card domain: models, state machine, priority scoring, context ledger,
//! and the storage seam with its two backends.

pub mod memory;
pub mod models;
pub mod priority;
pub mod service;
pub mod sqlite;
pub mod store;

pub use memory::MemoryCardStore;
pub use models::{
    Card, CardDetail, CardResponse, CardStatus, CardView, ContextLayer, Importance, LayerKind,
    Provenance, Reaction, ReadScope, Team, User, Visibility,
};
pub use service::{CardDraft, CardService};
pub use sqlite::SqliteCardStore;
pub use store::{CardStore, FeedFilter};

use thiserror::Error;

/// Domain error taxonomy. Maps 1:1 onto the API error envelope codes.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or missing input — 400
    #[error("{0}")]
    Validation(String),
    /// Authenticated but not entitled — 403
    #[error("{0}")]
    Forbidden(String),
    /// Unknown id — 404
    #[error("{0}")]
    NotFound(String),
    /// Duplicate unique field — 409
    #[error("{0}")]
    Conflict(String),
    /// Backend failure — 500
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
