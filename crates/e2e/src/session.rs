//! Interactive browser session abstraction.
//!
//! The sign-in choreography and the token sources only ever talk to a
//! `BrowserSession`; the Playwright driver is one implementation and tests use
//! an in-memory fake.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rolegate_common::AuthResult;

/// Element state to wait for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

/// Contents of the page's two storage tiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    #[serde(default)]
    pub local: BTreeMap<String, String>,
    #[serde(default)]
    pub session: BTreeMap<String, String>,
}

impl StorageSnapshot {
    /// Entries of both tiers, local storage first
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.local
            .iter()
            .chain(self.session.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One rendered browser page driven step by step.
///
/// Waits fail with `AuthError::AcquisitionTimeout` when the condition is not
/// met in time; other driver failures surface as `AuthError::Browser`.
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> AuthResult<()>;

    async fn click(&mut self, selector: &str, timeout: Duration) -> AuthResult<()>;

    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> AuthResult<()>;

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> AuthResult<()>;

    /// Wait until the page URL starts with `prefix`
    async fn wait_for_url(&mut self, prefix: &str, timeout: Duration) -> AuthResult<String>;

    async fn is_visible(&mut self, selector: &str) -> AuthResult<bool>;

    async fn current_url(&mut self) -> AuthResult<String>;

    async fn inner_text(&mut self, selector: &str, timeout: Duration) -> AuthResult<String>;

    async fn storage(&mut self) -> AuthResult<StorageSnapshot>;

    /// Release the session. Implementations must also release on drop.
    async fn close(&mut self) -> AuthResult<()>;
}

/// Opens fresh, isolated browser sessions
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> AuthResult<Box<dyn BrowserSession>>;
}
