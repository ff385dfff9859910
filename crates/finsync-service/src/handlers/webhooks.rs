//! Setu notification webhook.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;

use finsync_core::{Notification, WebhookEvent};

use crate::crypto::{verify_signature, SIGNATURE_HEADER};
use crate::engine;
use crate::error::ApiError;
use crate::state::AppState;

/// Handle a Setu notification.
///
/// Verifies the signature over the raw body, records the notification id
/// in the dedup ledger, then hands the event to the engine. Once the event
/// is accepted the answer is always `200`, even if processing failed, so
/// Setu does not keep redelivering it; failures are logged.
pub async fn setu_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    if let Some(secret) = &state.config.setu_webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing notification signature".into()))?;

        if !verify_signature(secret, &body, signature) {
            tracing::warn!("Invalid Setu notification signature");
            return Err(ApiError::BadRequest("Invalid notification signature".into()));
        }
    } else {
        tracing::warn!("Setu webhook secret not configured - skipping signature verification");
    }

    let raw: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let notification = match Notification::parse(raw) {
        Ok(notification) => notification,
        Err(e) => {
            tracing::warn!(error = %e, "Unrecognised Setu notification, ignoring");
            return Ok("ok");
        }
    };

    tracing::info!(
        event_type = %notification.event_type,
        notification_id = ?notification.notification_id,
        consent_id = ?notification.consent_id,
        session_id = ?notification.session_id,
        "Received Setu notification"
    );

    match WebhookEvent::for_notification(&notification) {
        Some(event) => {
            if !state.store.record_webhook_event(&event).await? {
                tracing::info!(
                    notification_id = %event.notification_id,
                    "Duplicate notification, skipping"
                );
                return Ok("duplicate");
            }
        }
        None => {
            tracing::debug!(
                event_type = %notification.event_type,
                "Notification has no id, processing without dedup"
            );
        }
    }

    if let Err(e) = engine::dispatch(&state, &notification).await {
        tracing::error!(
            event_type = %notification.event_type,
            error = %e,
            "Notification processing failed"
        );
    }

    Ok("ok")
}
