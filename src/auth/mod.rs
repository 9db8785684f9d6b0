//! Session Guard: JWT validation, rotating refresh-token families, and the
//! Bearer middleware for REST routes.

pub mod family;
pub mod jwt;
pub mod middleware;

pub use family::{IssuedRefresh, RefreshError, TokenFamilyStore};
pub use jwt::{decode_jwt, encode_jwt, Claims};
