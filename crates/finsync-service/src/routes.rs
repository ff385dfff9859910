//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, consents, health, sessions, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for user API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Consents (JWT auth)
/// - `POST /api/setu/consents` - Start account linking
/// - `GET /api/setu/consents` - List the caller's consents
/// - `GET /api/setu/consents/:id` - One consent with its sessions
/// - `POST /api/setu/consents/:id/revoke` - Revoke and remove linked data
///
/// ## Data sessions (JWT auth)
/// - `POST /api/setu/data-sessions` - Request a data session
/// - `GET /api/setu/data-sessions/:id/fetch` - Fetch and persist FI data
///
/// ## Accounts (JWT auth)
/// - `GET /api/setu/accounts` - List linked accounts
/// - `GET /api/setu/accounts/:id/transactions` - List an account's transactions
///
/// ## Webhooks (signature verification)
/// - `POST /notifications` - Setu notifications
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let api_routes = Router::new()
        .route(
            "/consents",
            post(consents::create_consent).get(consents::list_consents),
        )
        .route("/consents/:id", get(consents::get_consent))
        .route("/consents/:id/revoke", post(consents::revoke_consent))
        .route("/data-sessions", post(sessions::create_session))
        .route("/data-sessions/:id/fetch", get(sessions::fetch_session))
        .route("/accounts", get(accounts::list_accounts))
        .route(
            "/accounts/:id/transactions",
            get(accounts::list_transactions),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/api/setu", api_routes)
        // Webhooks (no rate limit - paced by Setu)
        .route("/notifications", post(webhooks::setu_notification))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}
