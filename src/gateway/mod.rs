//! Gateway server implementation

pub mod auth;
mod router;
pub mod security;
mod server;

pub use auth::{AuthContext, challenge_header};
pub use router::{AppState, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER, create_router};
pub use server::Gateway;
