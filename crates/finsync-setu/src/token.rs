//! Access token acquisition and caching.
//!
//! Setu issues short-lived bearer tokens from a login endpoint. The
//! [`SetuTokenManager`] caches the current token until shortly before expiry
//! and serializes refreshes behind a mutex, so concurrent callers that find
//! the cache stale trigger exactly one login between them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::SetuError;

/// Lifetime assumed when the login response carries no `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Tokens are treated as expired this long before their real expiry.
///
/// Capped at a quarter of the token's lifetime so short-lived tokens are
/// still cached.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Source of bearer tokens for provider calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid token, fetching one if the cache is empty or stale.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::Token` if no token can be obtained.
    async fn token(&self) -> Result<String, SetuError>;

    /// Force a new token after `stale` was rejected.
    ///
    /// If another caller already replaced `stale`, the replacement is
    /// returned without a second login.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::Token` if no token can be obtained.
    async fn refresh(&self, stale: &str) -> Result<String, SetuError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn issued(value: String, ttl: Duration) -> Self {
        let skew = EXPIRY_SKEW.min(ttl / 4);
        Self {
            value,
            refresh_at: Instant::now() + (ttl - skew),
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() < self.refresh_at
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "clientID")]
    client_id: &'a str,
    secret: &'a str,
    grant_type: &'static str,
}

/// Token provider backed by Setu's login endpoint.
pub struct SetuTokenManager {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for SetuTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetuTokenManager")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl SetuTokenManager {
    /// Create a token manager.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SetuError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SetuError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: Mutex::new(None),
        })
    }

    /// Log in and return a fresh token. Callers hold the cache lock.
    async fn login(&self) -> Result<CachedToken, SetuError> {
        let request = LoginRequest {
            client_id: &self.client_id,
            secret: &self.client_secret,
            grant_type: "client_credentials",
        };

        let response = self
            .client
            .post(&self.token_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SetuError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Setu login rejected");
            return Err(SetuError::Token(format!("login returned HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SetuError::Token(e.to_string()))?;
        let value = ["access_token", "accessToken", "token"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .or_else(|| body.pointer("/data/token").and_then(Value::as_str))
            .ok_or_else(|| SetuError::Token("login response carried no token".into()))?
            .to_string();
        let ttl = body
            .get("expires_in")
            .or_else(|| body.get("expiresIn"))
            .and_then(Value::as_u64)
            .map_or(DEFAULT_TOKEN_TTL, Duration::from_secs);

        tracing::debug!(ttl_secs = ttl.as_secs(), "Obtained Setu access token");
        Ok(CachedToken::issued(value, ttl))
    }
}

#[async_trait]
impl TokenProvider for SetuTokenManager {
    async fn token(&self) -> Result<String, SetuError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh()) {
            return Ok(cached.value.clone());
        }
        let fresh = self.login().await?;
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(value)
    }

    async fn refresh(&self, stale: &str) -> Result<String, SetuError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.value != stale && cached.is_fresh() {
                return Ok(cached.value.clone());
            }
        }
        tracing::info!("Refreshing Setu access token");
        let fresh = self.login().await?;
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(value)
    }
}
