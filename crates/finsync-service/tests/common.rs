//! Common test utilities for finsync integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum_test::{TestResponse, TestServer};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use finsync_core::{
    Account, Consent, ConsentId, ConsentStatus, DataSession, DateRange, FetchType, UserId,
    DEFAULT_LOOKBACK_MONTHS,
};
use finsync_service::auth::JwtClaims;
use finsync_service::crypto::{hmac_sha256_hex, SIGNATURE_HEADER};
use finsync_service::{create_router, AppState, ServiceConfig};
use finsync_setu::{SetuClient, SetuError, TokenProvider};
use finsync_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Token provider that never expires.
struct StaticToken;

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, SetuError> {
        Ok("test-access-token".into())
    }

    async fn refresh(&self, _stale: &str) -> Result<String, SetuError> {
        Ok("test-access-token".into())
    }
}

/// Answers each session request with a new provider session id.
#[derive(Default)]
pub struct SequentialSessions {
    count: AtomicUsize,
}

impl Respond for SequentialSessions {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(201).set_body_json(json!({
            "id": format!("session-{n}"),
            "status": "PENDING"
        }))
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Mock Setu API.
    pub setu: MockServer,
    /// The store behind the server, for seeding and assertions.
    pub store: Arc<MemoryStore>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh store and mock Setu.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a harness, adjusting the default test config first.
    pub async fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let setu = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: Some(JWT_SECRET.into()),
            setu_base_url: format!("{}/v2", setu.uri()),
            setu_product_instance_id: "pi-test".into(),
            setu_webhook_secret: Some(WEBHOOK_SECRET.into()),
            setu_timeout_seconds: 5,
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let client = SetuClient::new(config.setu_options(), Arc::new(StaticToken))
            .expect("Failed to build Setu client");
        let state = AppState::new(store.clone(), Arc::new(client), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            setu,
            store,
            test_user_id: UserId::generate(),
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        auth_header_for(self.test_user_id)
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        auth_header_for(UserId::generate())
    }

    /// Store a consent for the test user directly.
    pub async fn seed_consent(
        &self,
        consent_id: &str,
        fetch_type: FetchType,
        status: ConsentStatus,
    ) -> Consent {
        let now = Utc::now();
        let consent = Consent {
            consent_id: ConsentId::new(consent_id).unwrap(),
            user_id: self.test_user_id,
            status,
            fetch_type,
            date_range: DateRange::consent_window(now, DEFAULT_LOOKBACK_MONTHS, 12),
            purpose: "test".into(),
            vua: Some("9999999999@onemoney".into()),
            redirect_url: None,
            raw: Value::Null,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_consent(&consent).await.unwrap();
        consent
    }

    /// Deliver a signed notification.
    pub async fn notify(&self, body: &Value) -> TestResponse {
        let raw = body.to_string();
        let signature = hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), raw.as_bytes());
        self.server
            .post("/notifications")
            .add_header(SIGNATURE_HEADER, signature)
            .text(raw)
            .await
    }

    /// Mount `POST /v2/sessions` handing out `session-1`, `session-2`, ...
    pub async fn mock_sessions(&self) {
        Mock::given(method("POST"))
            .and(path("/v2/sessions"))
            .respond_with(SequentialSessions::default())
            .mount(&self.setu)
            .await;
    }

    /// Mount `GET /v2/sessions/{id}` returning `payload`.
    pub async fn mock_fetch(&self, session_id: &str, payload: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v2/sessions/{session_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload))
            .mount(&self.setu)
            .await;
    }

    /// Mount `POST /v2/consents/{id}/revoke` answering 200.
    pub async fn mock_revoke(&self) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/v2/consents/[^/]+/revoke$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "REVOKED" })))
            .mount(&self.setu)
            .await;
    }

    /// Sessions recorded for a consent, oldest first.
    pub async fn sessions(&self, consent_id: &str) -> Vec<DataSession> {
        self.store
            .list_sessions_by_consent(&ConsentId::new(consent_id).unwrap())
            .await
            .unwrap()
    }

    /// Accounts recorded under a consent.
    pub async fn accounts(&self, consent_id: &str) -> Vec<Account> {
        self.store
            .list_accounts_by_consent(&ConsentId::new(consent_id).unwrap())
            .await
            .unwrap()
    }

    /// Number of requests Setu received on `path`.
    pub async fn setu_calls(&self, method_name: &str, request_path: &str) -> usize {
        self.setu
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == method_name && r.url.path() == request_path)
            .count()
    }
}

/// Bearer header carrying a valid JWT for `user_id`.
pub fn auth_header_for(user_id: UserId) -> String {
    let claims = JwtClaims {
        sub: user_id.to_string(),
        exp: Utc::now().timestamp() + 3600,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test JWT");
    format!("Bearer {token}")
}

/// FI payload in the grouped-by-FIP shape with two transactions.
pub fn fi_payload() -> Value {
    json!({
        "status": "COMPLETED",
        "fips": [{
            "fipID": "HDFC-FIP",
            "accounts": [{
                "linkRefNumber": "ref-1",
                "maskedAccNumber": "XXXX1234",
                "data": { "account": {
                    "type": "deposit",
                    "summary": { "currentBalance": "1500.00", "currency": "INR", "type": "SAVINGS" },
                    "transactions": { "transaction": [
                        { "txnId": "TXN100", "amount": "250.00", "type": "DEBIT",
                          "valueDate": "2025-02-01", "narration": "UPI/coffee" },
                        { "txnId": "TXN101", "amount": "1000", "type": "CREDIT",
                          "valueDate": "2025-02-03" }
                    ] }
                } }
            }]
        }]
    })
}

/// A `SESSION_STATUS_UPDATE` notification.
pub fn session_update(notification_id: &str, session_id: &str, status: &str) -> Value {
    json!({
        "type": "SESSION_STATUS_UPDATE",
        "notificationId": notification_id,
        "dataSessionId": session_id,
        "data": { "status": status }
    })
}

/// A consent status notification.
pub fn consent_update(notification_id: &str, consent_id: &str, status: &str) -> Value {
    json!({
        "type": "CONSENT_STATUS_UPDATE",
        "notificationId": notification_id,
        "consentId": consent_id,
        "data": { "status": status }
    })
}
