//! Authentication module
//!
//! Supports: Basic, Bearer, OAuth2 client credentials
//!
//! The `Authenticator` applies credentials to outgoing requests and caches
//! client-credentials tokens until shortly before they expire.

mod authenticator;
mod types;

pub use authenticator::Authenticator;
pub use types::{AuthConfig, CachedToken};
