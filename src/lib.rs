//! OAuth2 authorization-server protocol engine.
//!
//! Issues, validates, and revokes authorization codes, access tokens, and
//! refresh tokens on behalf of registered clients and resource owners,
//! enforcing realm-scoped grants and expiry per RFC 6749/6750.

pub mod config;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod storage;
