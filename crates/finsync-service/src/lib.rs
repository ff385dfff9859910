//! Finsync HTTP service.
//!
//! This crate links users' bank accounts through the Setu Account
//! Aggregator:
//!
//! - Consent initiation, listing and revocation
//! - Data session requests and FI data fetches
//! - Setu notification webhook driving the consent and session state machines
//! - Ingestion of FI payloads into accounts and transactions
//!
//! # Authentication
//!
//! User endpoints expect an HS256 JWT issued by the wider application.
//! The notification webhook is authenticated by an HMAC signature over the
//! raw body.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use engine::{EngineError, SessionOutcome, SessionTrigger};
pub use error::ApiError;
pub use ingest::IngestReport;
pub use routes::create_router;
pub use state::AppState;
