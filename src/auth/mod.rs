//! Authentication module
//!
//! Supports: Bearer, Custom Headers, JWT (service account)
//!
//! The `Authenticator` applies credentials to sink requests and caches the
//! access token obtained from a JWT exchange until it expires.

mod authenticator;
mod types;

pub use authenticator::Authenticator;
pub use types::{AuthConfig, CachedToken, ServiceAccountKey, DEFAULT_TOKEN_URI};
