//! Token provider: cache lookup, expiry check and the strategy chain.
//!
//! ```text
//! get_token(role)
//!   ├── registry.resolve(role)          UnknownRole → fail, nothing acquired
//!   ├── lock(role)                      one acquisition per role at a time
//!   ├── cache.get(role) + is_expired    fresh hit → return
//!   └── timeout(strategies…)            first success wins;
//!         ├── direct                    Rejected → try next
//!         └── interactive               anything else → fail
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::cache::TokenCache;
use crate::error::{AuthError, AuthResult};
use crate::expiry::{time_until_expiration_secs, ExpirationPolicy};
use crate::registry::{Credential, Role, RoleRegistry};
use crate::strategy::AcquisitionStrategy;
use crate::token::TokenRecord;

/// Default bound on one complete acquisition (all strategies)
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(90);

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hands out valid tokens per role, acquiring them on demand
pub struct TokenProvider {
    registry: Arc<RoleRegistry>,
    cache: Arc<TokenCache>,
    strategies: Vec<Arc<dyn AcquisitionStrategy>>,
    policy: ExpirationPolicy,
    acquire_timeout: Duration,
    clock: Arc<dyn Clock>,
    /// Per-role guards around check-then-acquire-then-store
    locks: parking_lot::Mutex<HashMap<Role, Arc<AsyncMutex<()>>>>,
}

impl TokenProvider {
    pub fn new(registry: Arc<RoleRegistry>, cache: Arc<TokenCache>) -> Self {
        Self {
            registry,
            cache,
            strategies: Vec::new(),
            policy: ExpirationPolicy::default(),
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            clock: Arc::new(SystemClock),
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Append a strategy; strategies run in insertion order
    pub fn with_strategy(mut self, strategy: Arc<dyn AcquisitionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Return a token valid at call time, from cache when possible
    pub async fn get_token(&self, role: &Role) -> AuthResult<TokenRecord> {
        let credential = self.registry.resolve(role)?.clone();

        let lock = self.role_lock(role);
        let _guard = lock.lock().await;

        if let Some(record) = self.cache.get(role) {
            if !self.policy.is_expired(&record, self.clock.now_ms()) {
                debug!(role = %role, fingerprint = %record.fingerprint(), "token cache hit");
                return Ok(record);
            }
            debug!(role = %role, "cached token is stale, reacquiring");
        }

        self.acquire_and_store(role, &credential).await
    }

    /// Acquire a new token even if a valid one is cached.
    ///
    /// This is the call-site retry path: the subsystem itself never repeats a
    /// strategy.
    pub async fn refresh(&self, role: &Role) -> AuthResult<TokenRecord> {
        let credential = self.registry.resolve(role)?.clone();

        let lock = self.role_lock(role);
        let _guard = lock.lock().await;

        self.acquire_and_store(role, &credential).await
    }

    /// Seconds until the cached token for `role` expires, if one is cached
    pub fn time_until_expiration(&self, role: &Role) -> Option<u64> {
        self.cache
            .get(role)
            .map(|record| time_until_expiration_secs(&record, self.clock.now_ms()))
    }

    /// Drop the cached token for one role
    pub fn invalidate(&self, role: &Role) {
        if self.cache.remove(role).is_some() {
            debug!(role = %role, "token invalidated");
        }
    }

    fn role_lock(&self, role: &Role) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(role.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn acquire_and_store(
        &self,
        role: &Role,
        credential: &Credential,
    ) -> AuthResult<TokenRecord> {
        let record = match tokio::time::timeout(
            self.acquire_timeout,
            self.run_strategies(role, credential),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    role = %role,
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "token acquisition timed out"
                );
                return Err(AuthError::timeout(
                    format!("acquire token for role {}", role),
                    self.acquire_timeout,
                ));
            }
        };

        let now = self.clock.now_ms();
        if self.policy.is_expired(&record, now) {
            warn!(
                role = %role,
                fingerprint = %record.fingerprint(),
                "acquired token is already inside the safety margin"
            );
            return Err(AuthError::ExpiredOnArrival {
                role: role.to_string(),
            });
        }

        info!(
            role = %role,
            fingerprint = %record.fingerprint(),
            expires_in_secs = time_until_expiration_secs(&record, now),
            "token acquired"
        );
        self.cache.put(role.clone(), record.clone());
        Ok(record)
    }

    async fn run_strategies(
        &self,
        role: &Role,
        credential: &Credential,
    ) -> AuthResult<TokenRecord> {
        let mut last_rejection = None;

        for strategy in &self.strategies {
            debug!(role = %role, strategy = strategy.name(), "attempting acquisition");
            match strategy.acquire(role, credential).await {
                Ok(record) => {
                    debug!(role = %role, strategy = strategy.name(), "acquisition succeeded");
                    return Ok(record);
                }
                Err(e) if e.is_rejection() => {
                    warn!(
                        role = %role,
                        strategy = strategy.name(),
                        error = %e,
                        "strategy rejected, falling through"
                    );
                    last_rejection = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_rejection.unwrap_or(AuthError::NoStrategies))
    }
}
