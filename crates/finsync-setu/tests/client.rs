//! Setu client tests against a mock provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use finsync_core::{ConsentId, DateRange, FetchType};
use finsync_setu::{
    ConsentInput, SetuClient, SetuError, SetuOptions, SetuTokenManager, TokenProvider,
};

/// Hands out `stale` until asked to refresh, then `fresh`.
#[derive(Default)]
struct RotatingTokens {
    refreshes: AtomicUsize,
}

#[async_trait]
impl TokenProvider for RotatingTokens {
    async fn token(&self) -> Result<String, SetuError> {
        if self.refreshes.load(Ordering::SeqCst) == 0 {
            Ok("stale".into())
        } else {
            Ok("fresh".into())
        }
    }

    async fn refresh(&self, _stale: &str) -> Result<String, SetuError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok("fresh".into())
    }
}

fn client(server: &MockServer, tokens: Arc<dyn TokenProvider>) -> SetuClient {
    SetuClient::new(
        SetuOptions {
            base_url: format!("{}/v2", server.uri()),
            product_instance_id: "pi-test".into(),
            timeout: Duration::from_secs(5),
        },
        tokens,
    )
    .unwrap()
}

fn consent_id() -> ConsentId {
    ConsentId::new("consent-1").unwrap()
}

#[tokio::test]
async fn unauthorized_call_is_retried_once_with_a_fresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/sessions"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/sessions"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "s-1", "status": "PENDING"})))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = Arc::new(RotatingTokens::default());
    let session = client(&server, tokens.clone())
        .create_session(&consent_id(), None)
        .await
        .unwrap();

    assert_eq!(session.id, "s-1");
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_unauthorized_answer_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/sessions/s-1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(2)
        .mount(&server)
        .await;

    let tokens = Arc::new(RotatingTokens::default());
    let err = client(&server, tokens.clone())
        .fetch_session_data("s-1")
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn api_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/consents"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"errorCode": "InvalidVua"})),
        )
        .mount(&server)
        .await;

    let input = ConsentInput {
        vua: Some("bad".into()),
        data_range: DateRange::consent_window(Utc::now(), 6, 12),
        duration_months: 12,
        fetch_type: FetchType::Onetime,
        purpose: "Budgeting".into(),
        redirect_url: None,
    };
    let err = client(&server, Arc::new(RotatingTokens::default()))
        .create_consent(&input)
        .await
        .unwrap_err();

    match err {
        SetuError::Api { status, body } => {
            assert_eq!(status, 422);
            assert!(body.contains("InvalidVua"));
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn inverted_range_is_rejected_before_calling_setu() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let inverted = DateRange {
        from: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        to: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    };
    let err = client(&server, Arc::new(RotatingTokens::default()))
        .create_session(&consent_id(), Some(&inverted))
        .await
        .unwrap_err();

    assert!(matches!(err, SetuError::InvalidRange(_)));
}

#[tokio::test]
async fn requests_carry_product_instance_and_session_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/sessions"))
        .and(header("x-product-instance-id", "pi-test"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "s-2"})))
        .expect(1)
        .mount(&server)
        .await;

    let range = DateRange::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
    )
    .unwrap();
    client(&server, Arc::new(RotatingTokens::default()))
        .create_session(&consent_id(), Some(&range))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["consentId"], "consent-1");
    assert_eq!(body["format"], "json");
    assert_eq!(body["dataRange"]["from"], "2025-01-01T00:00:00.000Z");
}

#[tokio::test]
async fn revoke_posts_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/consents/consent-1/revoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "REVOKED"})))
        .expect(1)
        .mount(&server)
        .await;

    let raw = client(&server, Arc::new(RotatingTokens::default()))
        .revoke_consent(&consent_id(), Some("user request"))
        .await
        .unwrap();

    assert_eq!(raw["status"], "REVOKED");
    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["reason"], "user request");
}

// ============================================================================
// Token manager
// ============================================================================

async fn login_server(expected_logins: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/users/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "abc", "expires_in": 1800})),
        )
        .expect(expected_logins)
        .mount(&server)
        .await;
    server
}

fn token_manager(server: &MockServer) -> SetuTokenManager {
    SetuTokenManager::new(
        format!("{}/v1/users/login", server.uri()),
        "client",
        "secret",
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn concurrent_callers_share_one_login() {
    let server = login_server(1).await;
    let manager = token_manager(&server);

    let tokens = futures::future::join_all((0..8).map(|_| manager.token())).await;

    for token in tokens {
        assert_eq!(token.unwrap(), "abc");
    }
}

#[tokio::test]
async fn refresh_of_an_already_replaced_token_does_not_log_in_again() {
    let server = login_server(1).await;
    let manager = token_manager(&server);

    assert_eq!(manager.token().await.unwrap(), "abc");
    assert_eq!(manager.refresh("older-token").await.unwrap(), "abc");
}

#[tokio::test]
async fn rejected_login_is_a_token_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/users/login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = token_manager(&server).token().await.unwrap_err();
    assert!(matches!(err, SetuError::Token(_)));
}
