use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;

use super::error::AuthError;
use super::jwt::{self, AuthToken};

/// Seam over the credential exchange so the push pipeline can be driven
/// without a live control plane.
#[async_trait]
pub trait PushTokenProvider: Send + Sync {
    async fn authenticate(&self, user_keys: &[String]) -> Result<AuthResult, AuthError>;
}

/// Outcome of the credential exchange: whether the control plane allows
/// push for this account and, if so, the decoded subscription token.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub push_enabled: bool,
    pub token: Option<AuthToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    push_enabled: bool,
    token: Option<String>,
}

/// Exchanges SDK credentials for a signed streaming token.
#[derive(Debug, Clone)]
pub struct StreamAuthenticator {
    client: Client,
    endpoint: Url,
    sdk_key: String,
}

impl StreamAuthenticator {
    pub fn new(endpoint: &str, sdk_key: impl Into<String>) -> Result<Self, AuthError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| AuthError::Config(format!("invalid auth endpoint '{endpoint}': {err}")))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| AuthError::Config(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            sdk_key: sdk_key.into(),
        })
    }

    /// Builds an authenticator against the configured endpoint.
    pub fn from_config(config: &SyncConfig, sdk_key: impl Into<String>) -> Result<Self, AuthError> {
        Self::new(&config.auth_endpoint, sdk_key)
    }
}

#[async_trait]
impl PushTokenProvider for StreamAuthenticator {
    /// Authenticates the given user keys and derives the channel set from
    /// the returned token.
    async fn authenticate(&self, user_keys: &[String]) -> Result<AuthResult, AuthError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RequestBody<'a> {
            users: &'a [String],
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.sdk_key)
            .json(&RequestBody { users: user_keys })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::Denied);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Endpoint(format!(
                "authentication failed ({status}): {body}"
            )));
        }

        let body: AuthResponse = response.json().await?;
        if !body.push_enabled {
            debug!("streaming disabled for these credentials");
            return Ok(AuthResult {
                push_enabled: false,
                token: None,
            });
        }

        let raw = body
            .token
            .ok_or(AuthError::InvalidToken("auth response carries no token"))?;
        let token = jwt::parse(&raw)?;
        Ok(AuthResult {
            push_enabled: true,
            token: Some(token),
        })
    }
}
