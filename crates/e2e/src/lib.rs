//! Rolegate E2E token harness
//!
//! Acquires bearer tokens for named roles so browser-driven tests can call the
//! application's API as those roles:
//! - Tries a direct password grant against the issuer's token endpoint
//! - Falls back to signing in through a Playwright-driven browser session
//! - Reads the token back from page storage or the profile view
//! - Switches roles in one session only via sign-out, or isolates them
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TokenRunner (tests/tokens.rs)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TokenProvider (rolegate-common)                            │
//! │    ├── RoleRegistry::resolve(role) -> Credential            │
//! │    ├── TokenCache + ExpirationPolicy                        │
//! │    └── strategies, in configured order:                     │
//! │          ├── DirectGrantStrategy   (reqwest, password grant)│
//! │          └── InteractiveStrategy                            │
//! │                ├── SessionLauncher -> BrowserSession        │
//! │                │     └── PlaywrightSession (node driver)    │
//! │                ├── SignInFlow { sign_in, sign_out }         │
//! │                └── TokenSource: StorageScan, RenderedText   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RoleSessionCoordinator                                     │
//! │    ├── RoleSession::sign_in_as(role)  (shared session)      │
//! │    └── acquire_isolated(roles)        (session per role)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod direct;
pub mod error;
pub mod interactive;
pub mod playwright;
pub mod runner;
pub mod session;
pub mod source;

#[cfg(test)]
mod test_support;

pub use config::{HarnessConfig, StrategyKind};
pub use coordinator::{RoleSession, RoleSessionCoordinator};
pub use direct::{DirectGrantConfig, DirectGrantStrategy};
pub use error::{E2eError, E2eResult};
pub use interactive::{InteractiveConfig, InteractiveStrategy, SignInFlow, SignInSurfaces};
pub use playwright::{PlaywrightConfig, PlaywrightLauncher};
pub use runner::{ClaimComparison, RoleTokenResult, RunReport, TokenRunner};
pub use session::{BrowserSession, SessionLauncher, StorageSnapshot, WaitState};
pub use source::TokenSource;
