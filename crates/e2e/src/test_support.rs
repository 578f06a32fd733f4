//! In-memory application and issuer used by the harness tests.
//!
//! `FakeSession` models just enough of the real pages: an entry page with a
//! sign-in affordance while unauthenticated, an issuer form, a user menu with
//! sign-out and issuer-side confirmation, and a profile view that can reveal
//! the raw token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use rolegate_common::token::encode_compact;
use rolegate_common::{AuthError, AuthResult, Credential, Role, RoleRegistry};

use crate::interactive::{InteractiveConfig, InteractiveStrategy, SignInSurfaces};
use crate::session::{BrowserSession, SessionLauncher, StorageSnapshot, WaitState};
use crate::source::{RenderedTextConfig, StorageScanConfig};

pub const PASSWORD: &str = "pw";

/// Deterministic access token for `role`
pub fn token_for(role: &str) -> String {
    encode_compact(
        &json!({"alg": "RS256", "typ": "JWT"}),
        &json!({
            "sub": format!("user-{}", role),
            "preferred_username": role,
            "iss": FakeApp::ISSUER_URL,
            "exp": 4_102_444_800i64,
            "scope": "openid profile",
            "realm_access": {"roles": [role]},
        }),
        &format!("signature-for-{}", role),
    )
}

fn id_token_for(role: &str) -> String {
    encode_compact(&json!({"alg": "RS256"}), &json!({"sub": role}), "id")
}

pub fn credential(role: &str) -> Credential {
    Credential::new(role, PASSWORD)
}

pub fn registry(roles: &[&str]) -> RoleRegistry {
    RoleRegistry::new(roles.iter().map(|r| (Role::new(r), credential(r))))
}

#[derive(Debug, Default)]
struct Counters {
    launched: AtomicUsize,
    closed: AtomicUsize,
    released: AtomicUsize,
}

/// Behaviour switches shared by every session of one fake application
#[derive(Clone)]
pub struct FakeApp {
    storage_token: bool,
    profile_token: bool,
    hang: bool,
    counters: Arc<Counters>,
}

impl FakeApp {
    pub const BASE_URL: &'static str = "http://app.test";
    pub const ISSUER_URL: &'static str = "http://issuer.test/realms/app";

    pub fn new() -> Self {
        Self {
            storage_token: true,
            profile_token: true,
            hang: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_storage_token(mut self, enabled: bool) -> Self {
        self.storage_token = enabled;
        self
    }

    pub fn with_profile_token(mut self, enabled: bool) -> Self {
        self.profile_token = enabled;
        self
    }

    /// Every wait blocks forever
    pub fn with_hang(mut self, hang: bool) -> Self {
        self.hang = hang;
        self
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            app: self.clone(),
            surfaces: Self::surfaces(),
            profile: RenderedTextConfig::default(),
            page: Page::Blank,
            url: "about:blank".to_string(),
            identity: None,
            menu_open: false,
            revealed: false,
            filled: HashMap::new(),
            storage: StorageSnapshot::default(),
            closed: false,
        }
    }

    pub fn launcher(&self) -> Arc<dyn SessionLauncher> {
        Arc::new(FakeLauncher { app: self.clone() })
    }

    pub fn surfaces() -> SignInSurfaces {
        SignInSurfaces {
            issuer_url: Self::ISSUER_URL.to_string(),
            step_timeout_ms: 50,
            redirect_timeout_ms: 50,
            ..Default::default()
        }
    }

    pub fn interactive_config() -> InteractiveConfig {
        InteractiveConfig {
            surfaces: Self::surfaces(),
            storage: StorageScanConfig {
                wait_ms: 20,
                poll_interval_ms: 5,
                ..Default::default()
            },
            profile: RenderedTextConfig {
                wait_ms: 50,
                ..Default::default()
            },
        }
    }

    pub fn strategy(&self) -> InteractiveStrategy {
        InteractiveStrategy::from_config(
            self.launcher(),
            Self::BASE_URL,
            &Self::interactive_config(),
        )
    }

    pub fn launched(&self) -> usize {
        self.counters.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Sessions dropped, closed or not
    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }
}

struct FakeLauncher {
    app: FakeApp,
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self) -> AuthResult<Box<dyn BrowserSession>> {
        self.app.counters.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.app.session()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Blank,
    App,
    Profile,
    IssuerLogin,
    IssuerLogout,
}

pub struct FakeSession {
    app: FakeApp,
    surfaces: SignInSurfaces,
    profile: RenderedTextConfig,
    page: Page,
    url: String,
    identity: Option<String>,
    menu_open: bool,
    revealed: bool,
    filled: HashMap<String, String>,
    storage: StorageSnapshot,
    closed: bool,
}

impl FakeSession {
    /// Role currently signed in, if any
    pub fn identity(&self) -> Option<String> {
        self.identity.clone()
    }

    /// Put the session straight into a signed-in state at the entry page
    pub fn force_signed_in(&mut self, role: &str) {
        self.complete_sign_in(role.to_string());
    }

    fn complete_sign_in(&mut self, role: String) {
        if self.app.storage_token {
            let stored = json!({"id_token": id_token_for(&role), "access_token": token_for(&role)});
            self.storage.session.insert(
                format!("oidc.user:{}:app", FakeApp::ISSUER_URL),
                stored.to_string(),
            );
        }
        self.storage.local.insert("theme".to_string(), "dark".to_string());
        self.identity = Some(role);
        self.navigate_app("/");
    }

    fn navigate_app(&mut self, path: &str) {
        self.url = format!("{}{}", FakeApp::BASE_URL, path);
        self.page = if path.starts_with(&self.profile.profile_path) {
            Page::Profile
        } else {
            Page::App
        };
        self.menu_open = false;
        self.revealed = false;
    }

    fn visible(&self, selector: &str) -> bool {
        let s = &self.surfaces;
        let signed_in = self.identity.is_some();

        if selector == s.sign_in_selector {
            return self.page == Page::App && !signed_in;
        }
        if selector == s.landing_selector {
            return self.page == Page::App && signed_in;
        }
        if Some(selector) == s.user_menu_selector.as_deref() {
            return matches!(self.page, Page::App | Page::Profile) && signed_in;
        }
        if selector == s.sign_out_selector {
            return self.menu_open && signed_in;
        }
        if Some(selector) == s.sign_out_confirm_selector.as_deref() {
            return self.page == Page::IssuerLogout;
        }
        if selector == s.username_selector
            || selector == s.password_selector
            || selector == s.submit_selector
        {
            return self.page == Page::IssuerLogin;
        }
        if selector == self.profile.reveal_selector {
            return self.page == Page::Profile && signed_in;
        }
        if selector == self.profile.token_text_selector {
            return self.page == Page::Profile && self.revealed && self.app.profile_token;
        }
        false
    }

    fn require_visible(&self, selector: &str, timeout: Duration) -> AuthResult<()> {
        if self.visible(selector) {
            Ok(())
        } else {
            Err(AuthError::timeout(format!("waiting for {}", selector), timeout))
        }
    }

    async fn maybe_hang(&self) {
        if self.app.hang {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&mut self, url: &str) -> AuthResult<()> {
        if self.closed {
            return Err(AuthError::Browser("session closed".to_string()));
        }
        if let Some(path) = url.strip_prefix(FakeApp::BASE_URL) {
            self.navigate_app(path);
        } else {
            self.url = url.to_string();
            self.page = Page::Blank;
        }
        Ok(())
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> AuthResult<()> {
        self.maybe_hang().await;
        self.require_visible(selector, timeout)?;
        let s = self.surfaces.clone();

        if selector == s.sign_in_selector {
            self.page = Page::IssuerLogin;
            self.url = format!(
                "{}/protocol/openid-connect/auth?client_id=app",
                FakeApp::ISSUER_URL
            );
            self.filled.clear();
        } else if selector == s.submit_selector {
            let username = self.filled.get(&s.username_selector).cloned().unwrap_or_default();
            let password = self.filled.get(&s.password_selector).cloned().unwrap_or_default();
            if password == PASSWORD && !username.is_empty() {
                self.complete_sign_in(username);
            }
        } else if Some(selector) == s.user_menu_selector.as_deref() {
            self.menu_open = true;
        } else if selector == s.sign_out_selector {
            self.page = Page::IssuerLogout;
            self.url = format!("{}/protocol/openid-connect/logout", FakeApp::ISSUER_URL);
        } else if Some(selector) == s.sign_out_confirm_selector.as_deref() {
            self.identity = None;
            self.storage = StorageSnapshot::default();
            self.navigate_app("/");
        } else if selector == self.profile.reveal_selector {
            self.revealed = true;
        }
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> AuthResult<()> {
        self.require_visible(selector, timeout)?;
        self.filled.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> AuthResult<()> {
        self.maybe_hang().await;
        let visible = self.visible(selector);
        let satisfied = match state {
            WaitState::Visible | WaitState::Attached => visible,
            WaitState::Hidden | WaitState::Detached => !visible,
        };
        if satisfied {
            Ok(())
        } else {
            Err(AuthError::timeout(
                format!("waiting for {} to be {}", selector, state.as_str()),
                timeout,
            ))
        }
    }

    async fn wait_for_url(&mut self, prefix: &str, timeout: Duration) -> AuthResult<String> {
        self.maybe_hang().await;
        if self.url.starts_with(prefix) {
            Ok(self.url.clone())
        } else {
            Err(AuthError::timeout(format!("waiting for url {}", prefix), timeout))
        }
    }

    async fn is_visible(&mut self, selector: &str) -> AuthResult<bool> {
        Ok(self.visible(selector))
    }

    async fn current_url(&mut self) -> AuthResult<String> {
        Ok(self.url.clone())
    }

    async fn inner_text(&mut self, selector: &str, timeout: Duration) -> AuthResult<String> {
        self.require_visible(selector, timeout)?;
        let role = self.identity.clone().unwrap_or_default();
        Ok(format!(
            "ID token: {}\nAccess token: {}\n",
            id_token_for(&role),
            token_for(&role)
        ))
    }

    async fn storage(&mut self) -> AuthResult<StorageSnapshot> {
        if self.page == Page::Blank {
            return Ok(StorageSnapshot::default());
        }
        Ok(self.storage.clone())
    }

    async fn close(&mut self) -> AuthResult<()> {
        if !self.closed {
            self.closed = true;
            self.app.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.app.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}
