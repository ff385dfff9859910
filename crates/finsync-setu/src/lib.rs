//! Setu Account Aggregator client.
//!
//! This crate wraps the four Setu FIU endpoints finsync depends on (create
//! consent, create data session, fetch FI data, revoke consent) behind
//! [`SetuClient`], and supplies bearer tokens through the injectable
//! [`TokenProvider`] trait.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use finsync_setu::{SetuClient, SetuOptions, SetuTokenManager};
//!
//! # async fn example() -> Result<(), finsync_setu::SetuError> {
//! let tokens = SetuTokenManager::new(
//!     "https://orgservice-prod.setu.co/v1/users/login",
//!     "client-id",
//!     "client-secret",
//!     Duration::from_secs(10),
//! )?;
//! let client = SetuClient::new(
//!     SetuOptions {
//!         product_instance_id: "product-instance".to_string(),
//!         ..SetuOptions::default()
//!     },
//!     Arc::new(tokens),
//! )?;
//!
//! let fi_data = client.fetch_session_data("session-id").await?;
//! println!("{fi_data}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod token;
mod types;

pub use client::{SetuClient, SetuOptions, PRODUCT_INSTANCE_HEADER};
pub use error::SetuError;
pub use token::{SetuTokenManager, TokenProvider, DEFAULT_TOKEN_TTL, EXPIRY_SKEW};
pub use types::{
    ConsentInput, ConsentResponse, SessionResponse, DEFAULT_CONSENT_TYPES, DEFAULT_FI_TYPES,
    DEFAULT_PURPOSE_CODE,
};
