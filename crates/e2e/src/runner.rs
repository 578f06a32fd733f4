//! Token runner: acquire tokens for a set of roles and report on them

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use rolegate_common::{
    time_until_expiration_secs, AcquisitionStrategy, Clock, Role, SystemClock, TokenCache,
    TokenProvider, TokenRecord,
};

use crate::config::{HarnessConfig, StrategyKind};
use crate::coordinator::RoleSessionCoordinator;
use crate::direct::DirectGrantStrategy;
use crate::error::E2eResult;
use crate::interactive::InteractiveStrategy;
use crate::playwright::PlaywrightLauncher;
use crate::session::SessionLauncher;

/// Claims that differ between any two tokens and say nothing about the role
const VOLATILE_CLAIMS: &[&str] = &["exp", "iat", "nbf", "jti", "auth_time", "session_state", "sid"];

/// Outcome for one role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTokenResult {
    pub role: String,
    pub success: bool,
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    pub expires_in_secs: Option<u64>,
    pub fingerprint: Option<String>,
    pub error: Option<String>,
}

impl RoleTokenResult {
    fn from_record(role: &Role, record: &TokenRecord, now_ms: i64) -> Self {
        let claims = record.claims();
        Self {
            role: role.to_string(),
            success: true,
            subject: claims.subject().map(String::from),
            issuer: claims.issuer().map(String::from),
            audience: claims.audience(),
            roles: claims.roles(),
            scopes: claims.scopes(),
            expires_in_secs: Some(time_until_expiration_secs(record, now_ms)),
            fingerprint: Some(record.fingerprint()),
            error: None,
        }
    }

    fn failed(role: &Role, error: String) -> Self {
        Self {
            role: role.to_string(),
            success: false,
            subject: None,
            issuer: None,
            audience: Vec::new(),
            roles: Vec::new(),
            scopes: Vec::new(),
            expires_in_secs: None,
            fingerprint: None,
            error: Some(error),
        }
    }
}

/// Claims of tokens held by different roles at the same time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimComparison {
    pub roles: Vec<String>,
    /// No two roles share a subject
    pub distinct_subjects: bool,
    /// Claims carried with the same value by every token
    pub shared: BTreeMap<String, Value>,
    /// Claim name to per-role value, for claims that are missing or differ somewhere
    pub differing: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ClaimComparison {
    pub fn from_records(records: &BTreeMap<Role, TokenRecord>) -> Self {
        let roles: Vec<String> = records.keys().map(Role::to_string).collect();

        let mut subjects: Vec<&str> = records
            .values()
            .filter_map(|r| r.claims().subject())
            .collect();
        let with_subject = subjects.len();
        subjects.sort_unstable();
        subjects.dedup();
        let distinct_subjects = with_subject == records.len() && subjects.len() == with_subject;

        let mut by_claim: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for (role, record) in records {
            for (name, value) in record.claims().as_map() {
                if VOLATILE_CLAIMS.contains(&name.as_str()) {
                    continue;
                }
                by_claim
                    .entry(name.clone())
                    .or_default()
                    .insert(role.to_string(), value.clone());
            }
        }

        let mut shared = BTreeMap::new();
        let mut differing = BTreeMap::new();
        for (name, values) in by_claim {
            let first = values.values().next().cloned();
            let uniform = values.len() == records.len()
                && values.values().all(|v| Some(v) == first.as_ref());
            match (uniform, first) {
                (true, Some(value)) => {
                    shared.insert(name, value);
                }
                _ => {
                    differing.insert(name, values);
                }
            }
        }

        Self {
            roles,
            distinct_subjects,
            shared,
            differing,
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub strategies: Vec<String>,
    pub results: Vec<RoleTokenResult>,
    pub comparison: Option<ClaimComparison>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Builds the provider from configuration and drives acquisitions
pub struct TokenRunner {
    config: HarnessConfig,
    provider: Arc<TokenProvider>,
    coordinator: RoleSessionCoordinator,
    clock: Arc<dyn Clock>,
}

impl TokenRunner {
    /// Runner backed by a Playwright browser
    pub fn new(config: HarnessConfig) -> E2eResult<Self> {
        let launcher = Arc::new(PlaywrightLauncher::new(config.browser.clone()));
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(
        config: HarnessConfig,
        launcher: Arc<dyn SessionLauncher>,
    ) -> E2eResult<Self> {
        config.validate()?;

        let registry = Arc::new(config.registry()?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let interactive = Arc::new(InteractiveStrategy::from_config(
            launcher,
            &config.base_url,
            &config.interactive,
        ));

        let mut provider = TokenProvider::new(registry.clone(), Arc::new(TokenCache::new()))
            .with_policy(config.policy())
            .with_acquire_timeout(config.acquire_timeout())
            .with_clock(clock.clone());

        for kind in &config.strategies {
            let strategy: Arc<dyn AcquisitionStrategy> = match kind {
                StrategyKind::Direct => Arc::new(DirectGrantStrategy::new(config.direct.clone())?),
                StrategyKind::Interactive => interactive.clone(),
            };
            provider = provider.with_strategy(strategy);
        }

        info!(
            base_url = %config.base_url,
            roles = registry.len(),
            strategies = ?provider.strategy_names(),
            "token runner ready"
        );

        Ok(Self {
            coordinator: RoleSessionCoordinator::new(registry, interactive),
            provider: Arc::new(provider),
            config,
            clock,
        })
    }

    pub fn provider(&self) -> &Arc<TokenProvider> {
        &self.provider
    }

    pub fn coordinator(&self) -> &RoleSessionCoordinator {
        &self.coordinator
    }

    /// Requested roles, or every registered role when none are given
    pub fn select_roles(&self, requested: &[String]) -> Vec<Role> {
        if requested.is_empty() {
            self.provider.registry().roles().cloned().collect()
        } else {
            requested.iter().map(Role::new).collect()
        }
    }

    /// Acquire a token for each role; failures are reported, not returned
    pub async fn run(&self, roles: &[Role]) -> RunReport {
        let start = Instant::now();
        info!("Acquiring tokens for {} role(s)...", roles.len());

        let outcomes = join_all(roles.iter().map(|role| self.provider.get_token(role))).await;
        let now = self.clock.now_ms();

        let mut results = Vec::with_capacity(roles.len());
        for (role, outcome) in roles.iter().zip(outcomes) {
            match outcome {
                Ok(record) => {
                    info!("✓ {} ({})", role, record.fingerprint());
                    results.push(RoleTokenResult::from_record(role, &record, now));
                }
                Err(e) => {
                    error!("✗ {} - {}", role, e);
                    results.push(RoleTokenResult::failed(role, e.to_string()));
                }
            }
        }

        let passed = results.iter().filter(|r| r.success).count();
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Token results: {} acquired, {} failed ({} ms)",
            passed,
            results.len() - passed,
            duration_ms
        );

        RunReport {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            strategies: self.provider.strategy_names().into_iter().map(String::from).collect(),
            results,
            comparison: None,
        }
    }

    /// Hold every role at once, each in its own session, and compare claims
    pub async fn compare(&self, roles: &[Role]) -> E2eResult<ClaimComparison> {
        let records = self.coordinator.acquire_isolated(roles).await?;
        Ok(ClaimComparison::from_records(&records))
    }

    /// Write the report as JSON into the output directory
    pub fn write_results(&self, report: &RunReport) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("token-report.json");
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;

        info!("Report written to: {}", path.display());
        Ok(path)
    }
}
