//! OAuth protocol engine: types, scope evaluation, the authorization
//! server, and bearer-token authentication for resource requests.

pub mod auth_server;
pub mod resource_server;
pub mod scopes;
pub mod types;
