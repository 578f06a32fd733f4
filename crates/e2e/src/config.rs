//! Harness configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use rolegate_common::{Credential, ExpirationPolicy, Role, RoleRegistry};

use crate::direct::DirectGrantConfig;
use crate::error::{E2eError, E2eResult};
use crate::interactive::InteractiveConfig;
use crate::playwright::PlaywrightConfig;

/// Config file used when `ROLEGATE_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "rolegate.toml";

/// Acquisition strategies, in the order they are listed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Direct,
    Interactive,
}

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Application under test
    pub base_url: String,

    /// Bound on one whole acquisition, across all strategies
    pub acquire_timeout_ms: u64,

    /// Tokens expiring within this margin are treated as expired
    pub safety_margin_ms: u64,

    pub strategies: Vec<StrategyKind>,

    /// Where run reports are written
    pub output_dir: PathBuf,

    /// Extra role credentials in TOML or YAML; inline `[roles]` win
    pub registry_file: Option<PathBuf>,

    pub direct: DirectGrantConfig,

    pub interactive: InteractiveConfig,

    pub browser: PlaywrightConfig,

    pub roles: BTreeMap<String, Credential>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            acquire_timeout_ms: 90_000,
            safety_margin_ms: 60_000,
            strategies: vec![StrategyKind::Direct, StrategyKind::Interactive],
            output_dir: PathBuf::from("test-results"),
            registry_file: None,
            direct: DirectGrantConfig::default(),
            interactive: InteractiveConfig::default(),
            browser: PlaywrightConfig::default(),
            roles: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file; a missing file gives the defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            debug!(path = %path.display(), "loaded harness config");
            Ok(config)
        } else {
            debug!(path = %path.display(), "no harness config, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the settings a run depends on
    pub fn validate(&self) -> E2eResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(E2eError::Config("base_url is empty".to_string()));
        }
        if self.strategies.is_empty() {
            return Err(E2eError::Config("no acquisition strategies configured".to_string()));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(E2eError::Config("acquire_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Role registry from `registry_file` then `[roles]`, with environment overrides
    pub fn registry(&self) -> E2eResult<RoleRegistry> {
        self.registry_with(|key| std::env::var(key).ok())
    }

    pub fn registry_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> E2eResult<RoleRegistry> {
        let mut entries: Vec<(Role, Credential)> = Vec::new();

        if let Some(path) = &self.registry_file {
            let from_file = RoleRegistry::load(path)?;
            entries.extend(from_file.iter().map(|(r, c)| (r.clone(), c.clone())));
        }
        let inline = RoleRegistry::from_table(&self.roles)?;
        entries.extend(inline.iter().map(|(r, c)| (r.clone(), c.clone())));

        Ok(RoleRegistry::new(entries).with_overrides(lookup))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::new(Duration::from_millis(self.safety_margin_ms))
    }
}
