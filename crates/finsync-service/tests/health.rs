//! Health check integration tests.

mod common;

use common::TestHarness;

#[tokio::test]
async fn health_reports_store_status() {
    let harness = TestHarness::new().await;

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    assert_eq!(body["service"], "finsync");
}

#[tokio::test]
async fn health_requires_no_auth() {
    let harness = TestHarness::new().await;

    harness.server.get("/health").await.assert_status_ok();
}
