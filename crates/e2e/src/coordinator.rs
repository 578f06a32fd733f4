//! Role switching and multi-role acquisition over browser sessions.
//!
//! A browser session carries exactly one identity. Switching roles inside one
//! session therefore always signs the previous identity out first; roles that
//! must be held at the same time each get their own session.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use rolegate_common::{AuthResult, Role, RoleRegistry, TokenRecord};

use crate::interactive::{close_quietly, InteractiveStrategy};
use crate::session::BrowserSession;

pub struct RoleSessionCoordinator {
    registry: Arc<RoleRegistry>,
    strategy: Arc<InteractiveStrategy>,
}

impl RoleSessionCoordinator {
    pub fn new(registry: Arc<RoleRegistry>, strategy: Arc<InteractiveStrategy>) -> Self {
        Self { registry, strategy }
    }

    /// Open one shared session that starts unauthenticated
    pub async fn open(&self) -> AuthResult<RoleSession> {
        let session = self.strategy.launcher().launch().await?;
        Ok(RoleSession {
            registry: self.registry.clone(),
            strategy: self.strategy.clone(),
            session,
            active: None,
        })
    }

    /// Acquire tokens for several roles at once, one isolated session each.
    ///
    /// Every role is resolved before any session is launched, and each
    /// session is closed whatever its outcome.
    pub async fn acquire_isolated(
        &self,
        roles: &[Role],
    ) -> AuthResult<BTreeMap<Role, TokenRecord>> {
        let mut requests = Vec::with_capacity(roles.len());
        for role in roles {
            requests.push((role.clone(), self.registry.resolve(role)?.clone()));
        }

        info!(roles = requests.len(), "acquiring tokens in isolated sessions");
        let results = join_all(requests.iter().map(|(role, credential)| {
            let strategy = self.strategy.clone();
            async move { strategy.acquire_interactive(role, credential).await }
        }))
        .await;

        let mut tokens = BTreeMap::new();
        for ((role, _), result) in requests.into_iter().zip(results) {
            tokens.insert(role, result?);
        }
        Ok(tokens)
    }
}

/// A single browser session moved between roles
pub struct RoleSession {
    registry: Arc<RoleRegistry>,
    strategy: Arc<InteractiveStrategy>,
    session: Box<dyn BrowserSession>,
    active: Option<Role>,
}

impl RoleSession {
    pub fn active_role(&self) -> Option<&Role> {
        self.active.as_ref()
    }

    /// Make `role` the session's identity and return its token.
    ///
    /// Signing in as the role already active re-reads its token without a
    /// new sign-in. The active role follows the browser's identity, so it is
    /// set once sign-in completes even if extraction then fails, and kept
    /// when signing out fails.
    pub async fn sign_in_as(&mut self, role: &Role) -> AuthResult<TokenRecord> {
        let credential = self.registry.resolve(role)?.clone();

        if self.active.as_ref() == Some(role) {
            debug!(role = %role, "role already active");
            return self.strategy.extract(self.session.as_mut()).await;
        }

        if let Some(previous) = &self.active {
            info!(from = %previous, to = %role, "switching role");
            self.sign_out().await?;
        }

        self.strategy
            .flow()
            .sign_in(self.session.as_mut(), role, &credential)
            .await?;
        self.active = Some(role.clone());
        self.strategy.extract(self.session.as_mut()).await
    }

    /// Sign the active role out, leaving the session unauthenticated
    pub async fn sign_out(&mut self) -> AuthResult<()> {
        if self.active.is_some() {
            self.strategy.flow().sign_out(self.session.as_mut()).await?;
            self.active = None;
        }
        Ok(())
    }

    pub async fn close(mut self) {
        close_quietly(self.session.as_mut()).await;
    }
}
