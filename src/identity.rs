use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::engine::EngineError;

pub const SECRET_HEADER: &str = "x-api-secret";
pub const DEFAULT_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const CREDENTIAL_CHECK_PATH: &str = "/api/auth/external-check";

/// The upstream system that owns staff credentials.
///
/// `Ok(None)` means the provider answered and refused; transport failures
/// are `UpstreamUnavailable`.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Raw user record for valid credentials.
    async fn check_credentials(&self, email: &str, password: &str) -> Result<Option<Value>, EngineError>;

    /// Email address carried by a valid third-party ID token.
    async fn verify_token(&self, token: &str) -> Result<Option<String>, EngineError>;
}

#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    upstream_url: Option<String>,
    secret: Option<String>,
    tokeninfo_url: String,
}

#[derive(Deserialize)]
struct TokenInfo {
    email: Option<String>,
}

fn unavailable(e: reqwest::Error) -> EngineError {
    warn!("identity provider request failed: {e}");
    EngineError::UpstreamUnavailable(e.to_string())
}

impl HttpIdentityProvider {
    pub fn new(
        upstream_url: Option<String>,
        secret: Option<String>,
        tokeninfo_url: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            upstream_url: upstream_url.map(|u| u.trim_end_matches('/').to_string()),
            secret,
            tokeninfo_url: tokeninfo_url.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn check_credentials(&self, email: &str, password: &str) -> Result<Option<Value>, EngineError> {
        let Some(base) = &self.upstream_url else {
            return Err(EngineError::UpstreamUnavailable("no identity provider configured".into()));
        };
        let mut request = self
            .client
            .post(format!("{base}{CREDENTIAL_CHECK_PATH}"))
            .json(&json!({ "username": email, "email": email, "password": password }));
        if let Some(secret) = &self.secret {
            request = request.header(SECRET_HEADER, secret);
        }

        let response = request.send().await.map_err(unavailable)?;
        if !response.status().is_success() {
            debug!("credential check refused with {}", response.status());
            return Ok(None);
        }
        let user = response.json::<Value>().await.map_err(unavailable)?;
        Ok(Some(user))
    }

    async fn verify_token(&self, token: &str) -> Result<Option<String>, EngineError> {
        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            debug!("token verification refused with {}", response.status());
            return Ok(None);
        }
        let info = response.json::<TokenInfo>().await.map_err(unavailable)?;
        Ok(info.email.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty()))
    }
}
