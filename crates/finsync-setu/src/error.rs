//! Provider client error types.

/// Errors that can occur when calling the Setu API.
#[derive(Debug, thiserror::Error)]
pub enum SetuError {
    /// HTTP request failed before a response arrived (connect, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Setu returned a non-2xx response.
    #[error("Setu API error: {status}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body as received.
        body: String,
    },

    /// A 2xx response lacked a field finsync needs.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The requested data window is invalid.
    #[error("invalid date range: {0}")]
    InvalidRange(String),

    /// An access token could not be obtained.
    #[error("token error: {0}")]
    Token(String),

    /// A response body could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SetuError {
    /// HTTP status of an API failure, if this is one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure came from Setu rejecting our credentials.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}
