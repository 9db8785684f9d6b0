//! REST + WebSocket API surface.

pub mod auth_handlers;
pub mod card_handlers;
pub mod context_handlers;
pub mod handlers;
pub mod query;
pub mod routes;
pub mod unread_handlers;
pub mod ws_handlers;

pub use handlers::{AppError, Envelope, HubState, ListEnvelope, ServerState};
pub use query::{FeedMeta, FeedParams};
pub use routes::create_router;
