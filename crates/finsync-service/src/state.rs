//! Application state.

use std::sync::Arc;

use finsync_setu::{SetuClient, SetuError, SetuTokenManager};
use finsync_store::Store;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Setu client for consents, sessions and FI data.
    pub setu: Arc<SetuClient>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state around an existing Setu client.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, setu: Arc<SetuClient>, config: ServiceConfig) -> Self {
        if config.setu_webhook_secret.is_none() {
            tracing::warn!("Setu webhook secret not configured - notifications will be unsigned");
        }
        if config.jwt_secret.is_none() {
            tracing::warn!("JWT secret not configured - user requests will be rejected");
        }

        Self {
            store,
            setu,
            config,
        }
    }

    /// Build the Setu client and token manager from `config`.
    ///
    /// # Errors
    ///
    /// Returns `SetuError::Configuration` if an HTTP client cannot be built.
    pub fn from_config(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self, SetuError> {
        let tokens = SetuTokenManager::new(
            &config.setu_token_url,
            &config.setu_client_id,
            &config.setu_client_secret,
            config.setu_timeout(),
        )?;
        let setu = SetuClient::new(config.setu_options(), Arc::new(tokens))?;
        tracing::info!(setu_url = %config.setu_base_url, "Setu integration enabled");

        Ok(Self::new(store, Arc::new(setu), config))
    }
}
