//! Rolegate Common Library
//!
//! Credential lifecycle core shared by the rolegate harness: the bearer token
//! codec, expiration policy, role registry, token cache and the provider that
//! runs acquisition strategies in order.

pub mod cache;
pub mod error;
pub mod expiry;
pub mod provider;
pub mod registry;
pub mod strategy;
pub mod token;

// Re-export commonly used types
pub use cache::TokenCache;
pub use error::{AuthError, AuthResult};
pub use expiry::{time_until_expiration_secs, ExpirationPolicy, DEFAULT_SAFETY_MARGIN};
pub use provider::{Clock, SystemClock, TokenProvider, DEFAULT_ACQUIRE_TIMEOUT};
pub use registry::{Credential, Role, RoleRegistry};
pub use strategy::AcquisitionStrategy;
pub use token::{Claims, TokenRecord};

/// Rolegate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
