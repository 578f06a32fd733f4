//! Role registry: the fixed table of pre-provisioned test identities.
//!
//! Roles are not discovered at runtime. The registry is loaded once at
//! process start from a TOML or YAML table and is read-only afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthError, AuthResult};

/// Environment variable prefix for per-role credential overrides
pub const ENV_PREFIX: &str = "ROLEGATE";

/// A named test identity (e.g. `employee`, `manager`, `admin`).
///
/// Names are normalised to lowercase so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `ROLEGATE_<ROLE>` with non-alphanumerics replaced by `_`
    fn env_key(&self, field: &str) -> String {
        let role: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}_{}_{}", ENV_PREFIX, role, field)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Role::new(name)
    }
}

/// Username/password pair for one role
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// On-disk shape of a standalone registry file
#[derive(Debug, Deserialize)]
struct RegistryFile {
    roles: BTreeMap<String, Credential>,
}

/// Static role → credential table
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    entries: BTreeMap<Role, Credential>,
}

impl RoleRegistry {
    pub fn new(entries: impl IntoIterator<Item = (Role, Credential)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Build from a name-keyed table, as found in config files.
    ///
    /// Two names that normalise to the same role are rejected.
    pub fn from_table(table: &BTreeMap<String, Credential>) -> AuthResult<Self> {
        let mut entries = BTreeMap::new();
        for (name, credential) in table {
            let role = Role::new(name);
            if entries.insert(role.clone(), credential.clone()).is_some() {
                return Err(AuthError::Config(format!(
                    "role {} is listed more than once",
                    role
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a registry from TOML (`[roles.<name>]` tables)
    pub fn from_toml(content: &str) -> AuthResult<Self> {
        let file: RegistryFile = toml::from_str(content)?;
        Self::from_table(&file.roles)
    }

    /// Parse a registry from YAML (`roles: {<name>: {username, password}}`)
    pub fn from_yaml(content: &str) -> AuthResult<Self> {
        let file: RegistryFile = serde_yaml::from_str(content)?;
        Self::from_table(&file.roles)
    }

    /// Load a registry file, choosing the format from its extension
    pub fn load(path: &Path) -> AuthResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Config(format!("cannot read registry {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("toml") => Self::from_toml(&content),
            other => Err(AuthError::Config(format!(
                "unsupported registry format {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Apply `ROLEGATE_<ROLE>_USERNAME` / `_PASSWORD` from `lookup` to known roles
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (role, credential) in self.entries.iter_mut() {
            if let Some(username) = lookup(&role.env_key("USERNAME")) {
                debug!(role = %role, "username overridden from environment");
                credential.username = username;
            }
            if let Some(password) = lookup(&role.env_key("PASSWORD")) {
                debug!(role = %role, "password overridden from environment");
                credential.password = password;
            }
        }
        self
    }

    /// Map a role name to its credential
    pub fn resolve(&self, role: &Role) -> AuthResult<&Credential> {
        self.entries
            .get(role)
            .ok_or_else(|| AuthError::UnknownRole(role.to_string()))
    }

    pub fn contains(&self, role: &Role) -> bool {
        self.entries.contains_key(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Role, &Credential)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn registry() -> RoleRegistry {
        RoleRegistry::from_toml(
            r#"
[roles.employee]
username = "emp@example.com"
password = "emp-pass"

[roles.Manager]
username = "mgr@example.com"
password = "mgr-pass"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_known_role() {
        let reg = registry();
        let cred = reg.resolve(&Role::new("manager")).unwrap();
        assert_eq!(cred.username, "mgr@example.com");
        assert_eq!(reg.resolve(&Role::new(" EMPLOYEE ")).unwrap().password, "emp-pass");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_resolve_unknown_role() {
        let err = registry().resolve(&Role::new("auditor")).unwrap_err();
        assert_eq!(err, AuthError::UnknownRole("auditor".to_string()));
    }

    #[test]
    fn test_yaml_registry() {
        let reg = RoleRegistry::from_yaml(
            "roles:\n  admin:\n    username: root@example.com\n    password: s3cret\n",
        )
        .unwrap();
        assert_eq!(
            reg.resolve(&Role::new("admin")).unwrap().username,
            "root@example.com"
        );
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "roles:\n  employee:\n    username: e\n    password: p").unwrap();

        let reg = RoleRegistry::load(&path).unwrap();
        assert!(reg.contains(&Role::new("employee")));

        let bad = dir.path().join("roles.ini");
        std::fs::write(&bad, "").unwrap();
        assert!(matches!(RoleRegistry::load(&bad), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_overrides_only_touch_known_roles() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ROLEGATE_MANAGER_PASSWORD", "from-env"),
            ("ROLEGATE_AUDITOR_PASSWORD", "ignored"),
        ]);
        let reg = registry().with_overrides(|k| env.get(k).map(|v| v.to_string()));

        let mgr = reg.resolve(&Role::new("manager")).unwrap();
        assert_eq!(mgr.password, "from-env");
        assert_eq!(mgr.username, "mgr@example.com");
        assert!(!reg.contains(&Role::new("auditor")));
    }

    #[test]
    fn test_duplicate_role_names_rejected() {
        let err = RoleRegistry::from_toml(
            r#"
[roles.Manager]
username = "a"
password = "1"

[roles.manager]
username = "b"
password = "2"
"#,
        )
        .unwrap_err();

        assert_eq!(err, AuthError::Config("role manager is listed more than once".to_string()));
    }

    #[test]
    fn test_env_key_sanitised() {
        assert_eq!(Role::new("team-lead").env_key("PASSWORD"), "ROLEGATE_TEAM_LEAD_PASSWORD");
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let debug = format!("{:?}", Credential::new("u", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
