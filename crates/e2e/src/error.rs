//! Error types for the token harness

use rolegate_common::AuthError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
