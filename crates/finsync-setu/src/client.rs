//! Setu HTTP client implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use finsync_core::{ConsentId, DateRange, DEFAULT_LOOKBACK_MONTHS};

use crate::error::SetuError;
use crate::token::TokenProvider;
use crate::types::{
    ConsentInput, ConsentResponse, CreateConsentRequest, CreateSessionRequest, RevokeRequest,
    SessionResponse,
};

/// Header carrying the Setu product instance.
pub const PRODUCT_INSTANCE_HEADER: &str = "x-product-instance-id";

/// Options for [`SetuClient`].
#[derive(Debug, Clone)]
pub struct SetuOptions {
    /// API base URL (e.g., `"https://fiu-sandbox.setu.co/v2"`).
    pub base_url: String,
    /// Product instance id sent with every call.
    pub product_instance_id: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for SetuOptions {
    fn default() -> Self {
        Self {
            base_url: "https://fiu-sandbox.setu.co/v2".to_string(),
            product_instance_id: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Setu Account Aggregator client.
///
/// Every call carries a bearer token from the injected [`TokenProvider`]. A
/// 401 answer forces one token refresh and one retry; a second 401 is
/// returned to the caller as `SetuError::Api`.
#[derive(Clone)]
pub struct SetuClient {
    client: Client,
    base_url: String,
    product_instance_id: String,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for SetuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetuClient")
            .field("base_url", &self.base_url)
            .field("product_instance_id", &self.product_instance_id)
            .finish_non_exhaustive()
    }
}

impl SetuClient {
    /// Create a new Setu client.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::Configuration` if the HTTP client cannot be built.
    pub fn new(options: SetuOptions, tokens: Arc<dyn TokenProvider>) -> Result<Self, SetuError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| SetuError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            product_instance_id: options.product_instance_id,
            tokens,
        })
    }

    /// Ask Setu for a consent.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::Api` carrying status and body on a non-2xx answer.
    pub async fn create_consent(&self, input: &ConsentInput) -> Result<ConsentResponse, SetuError> {
        let url = format!("{}/consents", self.base_url);
        let request = CreateConsentRequest::new(input);

        let raw = self.send(|| self.client.post(&url).json(&request)).await?;
        let consent = ConsentResponse::try_from(raw)?;

        tracing::info!(
            consent_id = %consent.id,
            status = %consent.status,
            fetch_type = input.fetch_type.as_str(),
            "Setu consent created"
        );
        Ok(consent)
    }

    /// Ask Setu for a data session under `consent_id`.
    ///
    /// Without a range the trailing six months are requested.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::InvalidRange` if `from` is after `to`, or
    /// `SetuError::Api` carrying status and body on a non-2xx answer.
    pub async fn create_session(
        &self,
        consent_id: &ConsentId,
        range: Option<&DateRange>,
    ) -> Result<SessionResponse, SetuError> {
        let range = match range {
            Some(range) if range.from > range.to => {
                return Err(SetuError::InvalidRange(format!(
                    "from {} is after to {}",
                    range.from, range.to
                )));
            }
            Some(range) => *range,
            None => DateRange::trailing_months(Utc::now(), DEFAULT_LOOKBACK_MONTHS),
        };

        let url = format!("{}/sessions", self.base_url);
        let request = CreateSessionRequest::new(consent_id.as_str(), &range);

        let raw = self.send(|| self.client.post(&url).json(&request)).await?;
        let session = SessionResponse::try_from(raw)?;

        tracing::info!(
            consent_id = %consent_id,
            session_id = %session.id,
            "Setu data session created"
        );
        Ok(session)
    }

    /// Fetch the FI data of a ready session.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::Api` on a non-2xx answer.
    pub async fn fetch_session_data(&self, session_id: &str) -> Result<Value, SetuError> {
        let url = format!("{}/sessions/{}", self.base_url, session_id);
        self.send(|| self.client.get(&url)).await
    }

    /// Revoke a consent.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::Api` on a non-2xx answer.
    pub async fn revoke_consent(
        &self,
        consent_id: &ConsentId,
        reason: Option<&str>,
    ) -> Result<Value, SetuError> {
        let url = format!("{}/consents/{}/revoke", self.base_url, consent_id);
        let request = RevokeRequest { reason };

        let raw = self.send(|| self.client.post(&url).json(&request)).await?;
        tracing::info!(consent_id = %consent_id, "Setu consent revoked");
        Ok(raw)
    }

    /// Send a request with auth headers, retrying once after a 401.
    async fn send<F>(&self, build: F) -> Result<Value, SetuError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.token().await?;
        let mut response = self.authorize(build(), &token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("Setu rejected access token, refreshing and retrying once");
            let fresh = self.tokens.refresh(&token).await?;
            response = self.authorize(build(), &fresh).send().await?;
        }

        Self::handle_response(response).await
    }

    fn authorize(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .bearer_auth(token)
            .header(PRODUCT_INSTANCE_HEADER, &self.product_instance_id)
    }

    /// Decode a 2xx body, or turn anything else into `SetuError::Api`.
    async fn handle_response(response: reqwest::Response) -> Result<Value, SetuError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Setu API call failed");
            return Err(SetuError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}
