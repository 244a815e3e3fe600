//! Axum HTTP server handlers and middleware for the OAuth endpoints.

pub mod context;
mod handler_authorize;
mod handler_token;
mod handler_tokens;
pub mod middleware_auth;
pub mod server;

pub use context::AppState;
pub use middleware_auth::AuthenticatedSubject;
pub use server::build_router;
