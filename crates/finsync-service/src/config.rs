//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use finsync_setu::SetuOptions;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// `PostgreSQL` connection string.
    pub database_url: String,

    /// Upper bound on pooled database connections.
    pub database_max_connections: u32,

    /// HS256 secret for user JWTs. Without it only test tokens authenticate.
    pub jwt_secret: Option<String>,

    /// Setu FIU API base URL.
    pub setu_base_url: String,

    /// Setu login endpoint issuing access tokens.
    pub setu_token_url: String,

    /// Setu client id.
    pub setu_client_id: String,

    /// Setu client secret.
    pub setu_client_secret: String,

    /// Setu product instance id.
    pub setu_product_instance_id: String,

    /// Shared secret for webhook signatures (optional).
    pub setu_webhook_secret: Option<String>,

    /// Timeout for each Setu call, in seconds.
    pub setu_timeout_seconds: u64,

    /// Create a data session as soon as a consent becomes active.
    pub session_on_consent_active: bool,

    /// Consent validity requested from Setu, in months.
    pub consent_duration_months: u32,

    /// Purpose text shown to the user on the consent screen.
    pub consent_purpose: String,

    /// Where Setu redirects the user after approval (optional).
    pub consent_redirect_url: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Setu secrets file structure.
#[derive(Debug, Deserialize)]
struct SetuSecrets {
    client_id: String,
    client_secret: String,
    product_instance_id: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

const DEFAULT_SETU_BASE_URL: &str = "https://fiu-sandbox.setu.co/v2";
const DEFAULT_SETU_TOKEN_URL: &str = "https://orgservice-prod.setu.co/v1/users/login";
const DEFAULT_CONSENT_PURPOSE: &str = "Personal finance management";

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let secrets = load_setu_secrets();

        Self {
            listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:8080"),
            database_url: env_or("DATABASE_URL", "postgres://localhost/finsync"),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            setu_base_url: env_or("SETU_BASE_URL", DEFAULT_SETU_BASE_URL),
            setu_token_url: env_or("SETU_TOKEN_URL", DEFAULT_SETU_TOKEN_URL),
            setu_client_id: secrets.client_id,
            setu_client_secret: secrets.client_secret,
            setu_product_instance_id: secrets.product_instance_id,
            setu_webhook_secret: secrets.webhook_secret,
            setu_timeout_seconds: env_parse("SETU_TIMEOUT_SECONDS", 30),
            session_on_consent_active: env_parse("SESSION_ON_CONSENT_ACTIVE", true),
            consent_duration_months: env_parse("CONSENT_DURATION_MONTHS", 12),
            consent_purpose: env_or("CONSENT_PURPOSE", DEFAULT_CONSENT_PURPOSE),
            consent_redirect_url: std::env::var("CONSENT_REDIRECT_URL").ok(),
            cors_origins: env_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 1024 * 1024), // 1MB
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 30),
        }
    }

    /// Per-call timeout for Setu.
    #[must_use]
    pub fn setu_timeout(&self) -> Duration {
        Duration::from_secs(self.setu_timeout_seconds)
    }

    /// Options for the Setu client.
    #[must_use]
    pub fn setu_options(&self) -> SetuOptions {
        SetuOptions {
            base_url: self.setu_base_url.clone(),
            product_instance_id: self.setu_product_instance_id.clone(),
            timeout: self.setu_timeout(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Load Setu secrets from file or environment.
fn load_setu_secrets() -> SetuSecrets {
    let secret_paths = [
        ".secrets/setu.json",
        "finsync/.secrets/setu.json",
        "../.secrets/setu.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<SetuSecrets>(path) {
            tracing::info!(path = %path, "Loaded Setu secrets from file");
            return secrets;
        }
    }

    // Fall back to environment variables
    tracing::debug!("Setu secrets file not found, using environment variables");
    SetuSecrets {
        client_id: std::env::var("SETU_CLIENT_ID").unwrap_or_default(),
        client_secret: std::env::var("SETU_CLIENT_SECRET").unwrap_or_default(),
        product_instance_id: std::env::var("SETU_PRODUCT_INSTANCE_ID").unwrap_or_default(),
        webhook_secret: std::env::var("SETU_WEBHOOK_SECRET").ok(),
    }
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost/finsync".into(),
            database_max_connections: 10,
            jwt_secret: None,
            setu_base_url: DEFAULT_SETU_BASE_URL.into(),
            setu_token_url: DEFAULT_SETU_TOKEN_URL.into(),
            setu_client_id: String::new(),
            setu_client_secret: String::new(),
            setu_product_instance_id: String::new(),
            setu_webhook_secret: None,
            setu_timeout_seconds: 30,
            session_on_consent_active: true,
            consent_duration_months: 12,
            consent_purpose: DEFAULT_CONSENT_PURPOSE.into(),
            consent_redirect_url: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
