//! Direct grant: exchange a role's username and password for a token in one
//! request to the issuer's token endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rolegate_common::{AcquisitionStrategy, AuthError, AuthResult, Credential, Role, TokenRecord};

/// Token endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectGrantConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scope: String,
    pub request_timeout_ms: u64,
}

impl Default for DirectGrantConfig {
    fn default() -> Self {
        Self {
            token_endpoint: "http://localhost:8180/realms/app/protocol/openid-connect/token"
                .to_string(),
            client_id: "rolegate".to_string(),
            client_secret: None,
            scope: "openid".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

pub struct DirectGrantStrategy {
    client: reqwest::Client,
    config: DirectGrantConfig,
}

impl DirectGrantStrategy {
    pub fn new(config: DirectGrantConfig) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DirectGrantConfig {
        &self.config
    }

    fn rejected(&self, status: u16, body: impl Into<String>) -> AuthError {
        AuthError::AcquisitionRejected {
            strategy: self.name().to_string(),
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for DirectGrantStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn acquire(&self, role: &Role, credential: &Credential) -> AuthResult<TokenRecord> {
        debug!(role = %role, endpoint = %self.config.token_endpoint, "requesting password grant");

        let mut form = vec![
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
            ("username", credential.username.as_str()),
            ("password", credential.password.as_str()),
            ("scope", self.config.scope.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::timeout(
                        "direct grant request",
                        Duration::from_millis(self.config.request_timeout_ms),
                    )
                } else {
                    AuthError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            info!(role = %role, status = status.as_u16(), "direct grant rejected");
            return Err(self.rejected(status.as_u16(), body));
        }

        let parsed: GrantResponse = serde_json::from_str(&body).map_err(|e| {
            self.rejected(status.as_u16(), format!("unreadable grant response: {}", e))
        })?;
        let token = parsed
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| self.rejected(status.as_u16(), "grant response has no access_token"))?;

        if let Some(kind) = parsed.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                debug!(token_type = kind, "unexpected token type in grant response");
            }
        }

        TokenRecord::decode(&token)
    }
}
