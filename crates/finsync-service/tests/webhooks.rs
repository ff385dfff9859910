//! Setu notification webhook integration tests.

mod common;

use axum::http::StatusCode;
use common::{consent_update, fi_payload, session_update, TestHarness};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use finsync_core::{ConsentId, ConsentStatus, FetchType, SessionStatus};
use finsync_service::crypto::SIGNATURE_HEADER;
use finsync_store::Store;

fn activation_with_accounts(notification_id: &str, consent_id: &str) -> serde_json::Value {
    json!({
        "type": "CONSENT_STATUS_UPDATE",
        "notificationId": notification_id,
        "consentId": consent_id,
        "data": {
            "status": "ACTIVE",
            "detail": { "accounts": [
                { "linkRefNumber": "ref-1", "maskedAccNumber": "XXXX1234",
                  "fipId": "HDFC-FIP", "accType": "SAVINGS" }
            ] }
        }
    })
}

// ============================================================================
// Signature Verification
// ============================================================================

#[tokio::test]
async fn unsigned_notification_is_rejected() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .post("/notifications")
        .json(&consent_update("n-1", "c-1", "ACTIVE"))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn wrongly_signed_notification_is_rejected() {
    let harness = TestHarness::new().await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Pending)
        .await;

    let response = harness
        .server
        .post("/notifications")
        .add_header(SIGNATURE_HEADER, "00".repeat(32))
        .json(&consent_update("n-1", "c-1", "ACTIVE"))
        .await;

    response.assert_status_bad_request();
    let consent = harness
        .store
        .get_consent(&ConsentId::new("c-1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consent.status, ConsentStatus::Pending);
}

#[tokio::test]
async fn notifications_are_accepted_unsigned_without_a_secret() {
    let harness = TestHarness::with_config(|c| {
        c.setu_webhook_secret = None;
        c.session_on_consent_active = false;
    })
    .await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Pending)
        .await;

    let response = harness
        .server
        .post("/notifications")
        .json(&consent_update("n-1", "c-1", "ACTIVE"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let harness = TestHarness::with_config(|c| c.setu_webhook_secret = None).await;

    let response = harness.server.post("/notifications").text("not json").await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn untyped_notification_is_acknowledged() {
    let harness = TestHarness::new().await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Pending)
        .await;

    let response = harness
        .notify(&json!({ "consentId": "c-1", "data": { "status": "ACTIVE" } }))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "ok");
    let stored = harness
        .store
        .get_consent(&ConsentId::new("c-1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ConsentStatus::Pending);
}

// ============================================================================
// Consent Notifications
// ============================================================================

#[tokio::test]
async fn activation_sets_active_and_links_accounts() {
    let harness = TestHarness::with_config(|c| c.session_on_consent_active = false).await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Pending)
        .await;

    let response = harness.notify(&activation_with_accounts("n-1", "c-1")).await;

    response.assert_status_ok();
    assert_eq!(response.text(), "ok");
    let consent = harness
        .store
        .get_consent(&ConsentId::new("c-1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consent.status, ConsentStatus::Active);
    assert_eq!(consent.raw["notificationId"], "n-1");

    let accounts = harness.accounts("c-1").await;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].account_ref.as_deref(), Some("ref-1"));
    assert_eq!(accounts[0].bank_name.as_deref(), Some("HDFC-FIP"));
    assert!(harness.sessions("c-1").await.is_empty());
}

#[tokio::test]
async fn duplicate_delivery_applies_once() {
    let harness = TestHarness::new().await;
    harness.mock_sessions().await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Pending)
        .await;

    let first = harness.notify(&activation_with_accounts("n-1", "c-1")).await;
    let second = harness.notify(&activation_with_accounts("n-1", "c-1")).await;

    assert_eq!(first.text(), "ok");
    second.assert_status_ok();
    assert_eq!(second.text(), "duplicate");
    assert_eq!(harness.accounts("c-1").await.len(), 1);
    assert_eq!(harness.sessions("c-1").await.len(), 1);
    assert_eq!(harness.store.webhook_event_count().await, 1);
}

#[tokio::test]
async fn notifications_without_id_are_processed_every_time() {
    let harness = TestHarness::new().await;
    harness.mock_sessions().await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Pending)
        .await;
    let body = json!({ "type": "CONSENT_APPROVED", "consentId": "c-1" });

    harness.notify(&body).await.assert_status_ok();
    harness.notify(&body).await.assert_status_ok();

    assert_eq!(harness.sessions("c-1").await.len(), 2);
    assert_eq!(harness.store.webhook_event_count().await, 0);
}

#[tokio::test]
async fn onetime_consent_gets_a_single_live_session() {
    let harness = TestHarness::new().await;
    harness.mock_sessions().await;
    harness
        .seed_consent("c-1", FetchType::Onetime, ConsentStatus::Pending)
        .await;

    for n in 1..=3 {
        harness
            .notify(&consent_update(&format!("n-{n}"), "c-1", "ACTIVE"))
            .await
            .assert_status_ok();
    }

    let sessions = harness.sessions("c-1").await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Pending);
    assert_eq!(sessions[0].session_id.as_deref(), Some("session-1"));
    assert_eq!(harness.setu_calls("POST", "/v2/sessions").await, 1);
}

#[tokio::test]
async fn periodic_consent_gets_a_session_per_activation() {
    let harness = TestHarness::new().await;
    harness.mock_sessions().await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Pending)
        .await;

    for n in 1..=3 {
        harness
            .notify(&consent_update(&format!("n-{n}"), "c-1", "ACTIVE"))
            .await
            .assert_status_ok();
    }

    let sessions = harness.sessions("c-1").await;
    assert_eq!(sessions.len(), 3);
    assert!(sessions.iter().all(|s| s.status == SessionStatus::Pending));
}

#[tokio::test]
async fn session_request_failure_is_recorded_and_acknowledged() {
    let harness = TestHarness::new().await;
    Mock::given(method("POST"))
        .and(path("/v2/sessions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&harness.setu)
        .await;
    harness
        .seed_consent("c-1", FetchType::Onetime, ConsentStatus::Pending)
        .await;

    let response = harness.notify(&consent_update("n-1", "c-1", "ACTIVE")).await;

    response.assert_status_ok();
    let sessions = harness.sessions("c-1").await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Failed);
    assert!(sessions[0].session_id.is_none());
    assert!(sessions[0].error.as_deref().unwrap().contains("500"));
}

#[tokio::test]
async fn revocation_notification_removes_linked_data() {
    let harness = TestHarness::with_config(|c| c.session_on_consent_active = false).await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Pending)
        .await;
    harness.notify(&activation_with_accounts("n-1", "c-1")).await;
    assert_eq!(harness.accounts("c-1").await.len(), 1);

    let response = harness
        .notify(&json!({ "type": "CONSENT_REVOKED", "notificationId": "n-2", "consentId": "c-1" }))
        .await;

    response.assert_status_ok();
    let consent = harness
        .store
        .get_consent(&ConsentId::new("c-1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consent.status, ConsentStatus::Revoked);
    assert!(harness.accounts("c-1").await.is_empty());
}

#[tokio::test]
async fn revoked_consent_ignores_later_activation() {
    let harness = TestHarness::new().await;
    harness.mock_sessions().await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Revoked)
        .await;

    let response = harness.notify(&consent_update("n-1", "c-1", "ACTIVE")).await;

    response.assert_status_ok();
    let consent = harness
        .store
        .get_consent(&ConsentId::new("c-1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consent.status, ConsentStatus::Revoked);
    assert!(harness.sessions("c-1").await.is_empty());
}

#[tokio::test]
async fn unrecognised_status_is_stored_verbatim() {
    let harness = TestHarness::new().await;
    harness
        .seed_consent("c-1", FetchType::Periodic, ConsentStatus::Active)
        .await;

    harness
        .notify(&consent_update("n-1", "c-1", "PAUSED"))
        .await
        .assert_status_ok();

    let consent = harness
        .store
        .get_consent(&ConsentId::new("c-1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consent.status, ConsentStatus::Other("PAUSED".into()));
}

#[tokio::test]
async fn unknown_consent_and_unknown_type_are_acknowledged() {
    let harness = TestHarness::new().await;

    harness
        .notify(&consent_update("n-1", "missing", "ACTIVE"))
        .await
        .assert_status_ok();
    let response = harness
        .notify(&json!({ "type": "FI_DATA_READY_SOMETHING", "notificationId": "n-2" }))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "ok");
}

// ============================================================================
// Session Notifications
// ============================================================================

async fn harness_with_pending_session() -> TestHarness {
    let harness = TestHarness::new().await;
    harness.mock_sessions().await;
    harness
        .seed_consent("c-1", FetchType::Onetime, ConsentStatus::Pending)
        .await;
    harness
        .notify(&consent_update("n-activate", "c-1", "ACTIVE"))
        .await
        .assert_status_ok();
    harness
}

#[tokio::test]
async fn completed_session_is_fetched_and_ingested() {
    let harness = harness_with_pending_session().await;
    harness.mock_fetch("session-1", fi_payload()).await;

    let response = harness
        .notify(&session_update("n-1", "session-1", "COMPLETED"))
        .await;

    response.assert_status_ok();
    let sessions = harness.sessions("c-1").await;
    assert_eq!(sessions[0].status, SessionStatus::Fetched);
    assert!(sessions[0].ready_at.is_some());
    assert!(sessions[0].fetched_at.is_some());
    assert_eq!(harness.store.transaction_count().await, 2);

    let accounts = harness.accounts("c-1").await;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].masked_number.as_deref(), Some("XXXX1234"));
}

#[tokio::test]
async fn repeated_session_notification_inserts_no_duplicates() {
    let harness = harness_with_pending_session().await;
    harness.mock_fetch("session-1", fi_payload()).await;

    harness
        .notify(&session_update("n-1", "session-1", "COMPLETED"))
        .await;
    let second = harness
        .notify(&session_update("n-1", "session-1", "COMPLETED"))
        .await;

    assert_eq!(second.text(), "duplicate");
    assert_eq!(harness.store.transaction_count().await, 2);
    assert_eq!(harness.setu_calls("GET", "/v2/sessions/session-1").await, 1);
}

#[tokio::test]
async fn completed_after_partial_fetches_remaining_data() {
    let harness = harness_with_pending_session().await;
    let mut partial = fi_payload();
    partial["fips"][0]["accounts"][0]["data"]["account"]["transactions"]["transaction"]
        .as_array_mut()
        .unwrap()
        .truncate(1);
    Mock::given(method("GET"))
        .and(path("/v2/sessions/session-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(partial))
        .up_to_n_times(1)
        .mount(&harness.setu)
        .await;
    harness.mock_fetch("session-1", fi_payload()).await;

    harness
        .notify(&session_update("n-1", "session-1", "PARTIAL"))
        .await
        .assert_status_ok();
    assert_eq!(harness.sessions("c-1").await[0].status, SessionStatus::Fetched);
    assert_eq!(harness.store.transaction_count().await, 1);

    harness
        .notify(&session_update("n-2", "session-1", "COMPLETED"))
        .await
        .assert_status_ok();

    assert_eq!(harness.sessions("c-1").await[0].status, SessionStatus::Fetched);
    assert_eq!(harness.store.transaction_count().await, 2);
    assert_eq!(harness.setu_calls("GET", "/v2/sessions/session-1").await, 2);
}

#[tokio::test]
async fn failed_session_is_marked_without_fetching() {
    let harness = harness_with_pending_session().await;

    harness
        .notify(&session_update("n-1", "session-1", "ERROR"))
        .await
        .assert_status_ok();

    let sessions = harness.sessions("c-1").await;
    assert_eq!(sessions[0].status, SessionStatus::Failed);
    assert_eq!(harness.setu_calls("GET", "/v2/sessions/session-1").await, 0);
}

#[tokio::test]
async fn fetch_failure_after_ready_marks_session_failed() {
    let harness = harness_with_pending_session().await;
    Mock::given(method("GET"))
        .and(path("/v2/sessions/session-1"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&harness.setu)
        .await;

    let response = harness
        .notify(&session_update("n-1", "session-1", "PARTIAL"))
        .await;

    response.assert_status_ok();
    let sessions = harness.sessions("c-1").await;
    assert_eq!(sessions[0].status, SessionStatus::Failed);
    assert!(sessions[0].ready_at.is_some());
    assert_eq!(harness.store.transaction_count().await, 0);
}

#[tokio::test]
async fn intermediate_session_status_changes_nothing() {
    let harness = harness_with_pending_session().await;

    harness
        .notify(&session_update("n-1", "session-1", "PENDING"))
        .await
        .assert_status_ok();

    assert_eq!(
        harness.sessions("c-1").await[0].status,
        SessionStatus::Pending
    );
}

#[tokio::test]
async fn notification_for_unknown_session_is_acknowledged() {
    let harness = TestHarness::new().await;

    let response = harness
        .notify(&session_update("n-1", "no-such-session", "COMPLETED"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}
