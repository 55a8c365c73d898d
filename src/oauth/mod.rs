//! OAuth 2.1 bearer-token verification for inbound requests
//!
//! Tokens are opaque to the gateway and verified out-of-band against the
//! authorization server's RFC 7662 introspection endpoint. Verification
//! results are cached by a one-way hash of the token, never the token
//! itself.

pub mod cache;
pub mod introspection;
pub mod metadata;
pub mod verifier;

pub use cache::{TokenCache, token_digest};
pub use introspection::TokenInfo;
pub use metadata::ProtectedResourceMetadata;
pub use verifier::TokenVerifier;
