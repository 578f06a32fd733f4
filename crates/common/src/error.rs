//! Error types for rolegate

use thiserror::Error;

/// Result type alias using the rolegate auth error
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Failures of the credential lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Acquisition rejected by {strategy} strategy (status {status}): {body}")]
    AcquisitionRejected {
        strategy: String,
        status: u16,
        body: String,
    },

    #[error("Token extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Timed out after {timeout_ms} ms: {operation}")]
    AcquisitionTimeout { operation: String, timeout_ms: u64 },

    #[error("Token for role {role} was already expired when acquired")]
    ExpiredOnArrival { role: String },

    #[error("No acquisition strategy configured")]
    NoStrategies,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether the provider should move on to the next strategy
    pub fn is_rejection(&self) -> bool {
        matches!(self, AuthError::AcquisitionRejected { .. })
    }

    /// Whether this error is a timeout of any acquisition step
    pub fn is_timeout(&self) -> bool {
        matches!(self, AuthError::AcquisitionTimeout { .. })
    }

    /// Build an `AcquisitionTimeout` for the named operation
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        AuthError::AcquisitionTimeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(e: toml::de::Error) -> Self {
        AuthError::Config(e.to_string())
    }
}

impl From<serde_yaml::Error> for AuthError {
    fn from(e: serde_yaml::Error) -> Self {
        AuthError::Config(e.to_string())
    }
}
