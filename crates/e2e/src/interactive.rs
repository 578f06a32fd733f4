//! Interactive (browser) token acquisition.
//!
//! Used when the issuer refuses the password grant for the harness client:
//! the sign-in form is driven in a real page and the token is read back out
//! of the signed-in session.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rolegate_common::{AcquisitionStrategy, AuthResult, Credential, Role, TokenRecord};

use crate::session::{BrowserSession, SessionLauncher, WaitState};
use crate::source::{
    extract_token, join_url, RenderedTextConfig, RenderedTextScan, StorageScan, StorageScanConfig,
    TokenSource,
};

/// Selectors and URLs of the sign-in and sign-out surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignInSurfaces {
    /// Application entry page, relative to the base URL
    pub entry_path: String,
    /// Affordance on the entry page that starts sign-in
    pub sign_in_selector: String,
    /// URL prefix of the identity issuer's sign-in page
    pub issuer_url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    /// Landing view shown to any signed-in role
    pub landing_selector: String,
    /// Menu that must be opened before the sign-out control is reachable
    pub user_menu_selector: Option<String>,
    pub sign_out_selector: String,
    /// Issuer-side "confirm sign out" control, clicked when shown
    pub sign_out_confirm_selector: Option<String>,
    /// Bound on waiting for an element
    pub step_timeout_ms: u64,
    /// Bound on waiting for a cross-origin redirect
    pub redirect_timeout_ms: u64,
    /// Role-specific landing views, keyed by role name
    pub role_landing: BTreeMap<String, String>,
}

impl Default for SignInSurfaces {
    fn default() -> Self {
        Self {
            entry_path: "/".to_string(),
            sign_in_selector: "[data-testid=\"login-button\"]".to_string(),
            issuer_url: "http://localhost:8180/realms/".to_string(),
            username_selector: "#username".to_string(),
            password_selector: "#password".to_string(),
            submit_selector: "#kc-login".to_string(),
            landing_selector: "[data-testid=\"app-shell\"]".to_string(),
            user_menu_selector: Some("[data-testid=\"user-menu\"]".to_string()),
            sign_out_selector: "[data-testid=\"logout-button\"]".to_string(),
            sign_out_confirm_selector: Some("#kc-logout".to_string()),
            step_timeout_ms: 15_000,
            redirect_timeout_ms: 30_000,
            role_landing: BTreeMap::new(),
        }
    }
}

impl SignInSurfaces {
    /// Landing view that proves `role` is signed in; keys match like role names
    pub fn landing_selector_for(&self, role: &Role) -> &str {
        self.role_landing
            .iter()
            .find(|(name, _)| Role::new(name) == *role)
            .map(|(_, selector)| selector.as_str())
            .unwrap_or(self.landing_selector.as_str())
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    fn redirect_timeout(&self) -> Duration {
        Duration::from_millis(self.redirect_timeout_ms)
    }
}

/// The scripted sign-in and sign-out sequences
#[derive(Debug, Clone)]
pub struct SignInFlow {
    base_url: String,
    surfaces: SignInSurfaces,
}

impl SignInFlow {
    pub fn new(base_url: impl Into<String>, surfaces: SignInSurfaces) -> Self {
        Self {
            base_url: base_url.into(),
            surfaces,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn surfaces(&self) -> &SignInSurfaces {
        &self.surfaces
    }

    /// Sign in as `role` from an unauthenticated session.
    ///
    /// A session that still carries another identity never shows the sign-in
    /// affordance, so this fails with a timeout rather than returning under
    /// the wrong identity.
    pub async fn sign_in(
        &self,
        session: &mut dyn BrowserSession,
        role: &Role,
        credential: &Credential,
    ) -> AuthResult<()> {
        let s = &self.surfaces;
        let step = s.step_timeout();
        let redirect = s.redirect_timeout();

        info!(role = %role, username = %credential.username, "signing in interactively");

        session.goto(&join_url(&self.base_url, &s.entry_path)).await?;
        if let Err(e) = session
            .wait_for_selector(&s.sign_in_selector, WaitState::Visible, step)
            .await
        {
            let url = session.current_url().await.unwrap_or_default();
            warn!(url = %url, "sign-in affordance not shown; session may hold another identity");
            return Err(e);
        }
        session.click(&s.sign_in_selector, step).await?;

        let issuer_page = session.wait_for_url(&s.issuer_url, redirect).await?;
        debug!(url = %issuer_page, "reached issuer sign-in page");

        session
            .wait_for_selector(&s.username_selector, WaitState::Visible, step)
            .await?;
        session.fill(&s.username_selector, &credential.username, step).await?;
        session.fill(&s.password_selector, &credential.password, step).await?;
        session.click(&s.submit_selector, step).await?;

        let app_page = session.wait_for_url(&self.base_url, redirect).await?;
        debug!(url = %app_page, "redirected back to application");

        let landing = s.landing_selector_for(role);
        session.wait_for_selector(landing, WaitState::Visible, step).await?;

        info!(role = %role, "signed in");
        Ok(())
    }

    /// Sign out and confirm the session is back at the unauthenticated landing
    pub async fn sign_out(&self, session: &mut dyn BrowserSession) -> AuthResult<()> {
        let s = &self.surfaces;
        let step = s.step_timeout();
        let redirect = s.redirect_timeout();

        session.goto(&join_url(&self.base_url, &s.entry_path)).await?;
        if let Some(menu) = &s.user_menu_selector {
            session.click(menu, step).await?;
        }
        session.click(&s.sign_out_selector, step).await?;

        if let Some(confirm) = &s.sign_out_confirm_selector {
            if session.is_visible(confirm).await? {
                debug!("confirming sign-out at issuer");
                session.click(confirm, step).await?;
            }
        }

        session.wait_for_url(&self.base_url, redirect).await?;
        session
            .wait_for_selector(&s.sign_in_selector, WaitState::Visible, step)
            .await?;

        info!("signed out");
        Ok(())
    }
}

/// Settings for the interactive strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveConfig {
    pub surfaces: SignInSurfaces,
    pub storage: StorageScanConfig,
    pub profile: RenderedTextConfig,
}

/// Fallback strategy: sign in through the browser and read the token back
pub struct InteractiveStrategy {
    launcher: Arc<dyn SessionLauncher>,
    flow: SignInFlow,
    sources: Vec<Box<dyn TokenSource>>,
}

impl InteractiveStrategy {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        flow: SignInFlow,
        sources: Vec<Box<dyn TokenSource>>,
    ) -> Self {
        Self {
            launcher,
            flow,
            sources,
        }
    }

    /// Storage scan first, then the profile view
    pub fn from_config(
        launcher: Arc<dyn SessionLauncher>,
        base_url: &str,
        config: &InteractiveConfig,
    ) -> Self {
        let sources: Vec<Box<dyn TokenSource>> = vec![
            Box::new(StorageScan::new(config.storage.clone())),
            Box::new(RenderedTextScan::new(base_url, config.profile.clone())),
        ];
        Self::new(launcher, SignInFlow::new(base_url, config.surfaces.clone()), sources)
    }

    pub fn flow(&self) -> &SignInFlow {
        &self.flow
    }

    pub fn launcher(&self) -> &Arc<dyn SessionLauncher> {
        &self.launcher
    }

    /// Sign in and extract inside a session the caller owns
    pub async fn acquire_in(
        &self,
        session: &mut dyn BrowserSession,
        role: &Role,
        credential: &Credential,
    ) -> AuthResult<TokenRecord> {
        self.flow.sign_in(session, role, credential).await?;
        self.extract(session).await
    }

    /// Sign in as `role` in a fresh session; the session is closed on every path
    pub async fn acquire_interactive(
        &self,
        role: &Role,
        credential: &Credential,
    ) -> AuthResult<TokenRecord> {
        let mut session = self.launcher.launch().await?;
        let result = self.acquire_in(session.as_mut(), role, credential).await;
        close_quietly(session.as_mut()).await;
        result
    }

    /// Extract and decode the token of the identity already signed in
    pub async fn extract(&self, session: &mut dyn BrowserSession) -> AuthResult<TokenRecord> {
        let raw = extract_token(session, &self.sources).await?;
        TokenRecord::decode(&raw)
    }
}

#[async_trait]
impl AcquisitionStrategy for InteractiveStrategy {
    fn name(&self) -> &'static str {
        "interactive"
    }

    async fn acquire(&self, role: &Role, credential: &Credential) -> AuthResult<TokenRecord> {
        self.acquire_interactive(role, credential).await
    }
}

/// Close a session, logging rather than surfacing a close failure
pub(crate) async fn close_quietly(session: &mut dyn BrowserSession) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close browser session");
    }
}
