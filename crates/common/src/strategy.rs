//! Token acquisition strategy abstraction.

use async_trait::async_trait;

use crate::error::AuthResult;
use crate::registry::{Credential, Role};
use crate::token::TokenRecord;

/// One way of turning a role's credential into a bearer token.
///
/// Strategies never touch the cache. A strategy that is refused by the issuer
/// returns `AuthError::AcquisitionRejected`, which lets the provider move on
/// to the next strategy in its list; every other error is final.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Short name used in logs and rejection errors
    fn name(&self) -> &'static str;

    /// Acquire a fresh token for `role`
    async fn acquire(&self, role: &Role, credential: &Credential) -> AuthResult<TokenRecord>;
}
