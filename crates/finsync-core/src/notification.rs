//! Provider webhook notifications.
//!
//! A notification is JSON with its type in `type` (or `eventType`), ids at the
//! top level or under `data`, and event details under `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consent::ConsentEvent;
use crate::error::{Result, SyncError};
use crate::fi::{first_string, ACCOUNT_REF_FIELDS, FIP_FIELDS, MASKED_NUMBER_FIELDS};
use crate::ids::ConsentId;

/// What a notification is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// `CONSENT_ACCEPTED` / `CONSENT_APPROVED`.
    ConsentApproved,
    /// `CONSENT_REVOKED`.
    ConsentRevoked,
    /// `CONSENT_STATUS_UPDATE` with the reported `data.status`.
    ConsentStatusUpdate(String),
    /// `SESSION_STATUS_UPDATE` with the reported `data.status`.
    SessionStatusUpdate(String),
    /// Anything else.
    Unknown(String),
}

/// A parsed webhook delivery.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Event type as sent.
    pub event_type: String,
    /// Classified event.
    pub kind: NotificationKind,
    /// Dedup key, when the provider sent one.
    pub notification_id: Option<String>,
    /// Consent the event concerns.
    pub consent_id: Option<ConsentId>,
    /// Provider data session id, for session events.
    pub session_id: Option<String>,
    /// The full body.
    pub raw: Value,
}

impl Notification {
    /// Parse a notification body.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MissingField("type")` when neither `type` nor
    /// `eventType` is present.
    pub fn parse(raw: Value) -> Result<Self> {
        let event_type = first_string(&raw, &["type", "eventType", "event_type"])
            .ok_or(SyncError::MissingField("type"))?;
        let data = raw.get("data").unwrap_or(&Value::Null);
        let status = first_string(data, &["status"])
            .or_else(|| first_string(&raw, &["status"]))
            .unwrap_or_default()
            .to_ascii_uppercase();

        let kind = match event_type.to_ascii_uppercase().as_str() {
            "CONSENT_ACCEPTED" | "CONSENT_APPROVED" => NotificationKind::ConsentApproved,
            "CONSENT_REVOKED" => NotificationKind::ConsentRevoked,
            "CONSENT_STATUS_UPDATE" => NotificationKind::ConsentStatusUpdate(status),
            "SESSION_STATUS_UPDATE" => NotificationKind::SessionStatusUpdate(status),
            _ => NotificationKind::Unknown(event_type.clone()),
        };

        let notification_id = first_string(&raw, &["notificationId", "notification_id"])
            .or_else(|| first_string(&raw, &["requestId"]))
            .or_else(|| first_string(data, &["requestId", "notificationId"]));
        let consent_id = first_string(&raw, &["consentId", "consent_id"])
            .or_else(|| first_string(data, &["consentId", "consent_id"]))
            .and_then(|id| ConsentId::new(id).ok());
        let session_id = first_string(&raw, &["dataSessionId", "sessionId", "session_id"])
            .or_else(|| first_string(data, &["dataSessionId", "sessionId", "session_id"]));

        Ok(Self {
            event_type,
            kind,
            notification_id,
            consent_id,
            session_id,
            raw,
        })
    }

    /// The consent transition this notification asks for, if any.
    ///
    /// A `CONSENT_STATUS_UPDATE` without a status carries nothing to apply.
    #[must_use]
    pub fn consent_event(&self) -> Option<ConsentEvent> {
        match &self.kind {
            NotificationKind::ConsentApproved => Some(ConsentEvent::Activated),
            NotificationKind::ConsentRevoked => Some(ConsentEvent::Revoked),
            NotificationKind::ConsentStatusUpdate(status) if !status.is_empty() => {
                Some(ConsentEvent::from_status(status))
            }
            _ => None,
        }
    }

    /// Accounts embedded in a consent approval, if any.
    #[must_use]
    pub fn linked_accounts(&self) -> Vec<LinkedAccount> {
        let list = [
            "/data/detail/accounts",
            "/data/accounts",
            "/accounts",
            "/detail/accounts",
        ]
        .iter()
        .find_map(|path| self.raw.pointer(path).and_then(Value::as_array));

        list.map(|items| items.iter().map(LinkedAccount::from_value).collect())
            .unwrap_or_default()
    }
}

/// An account announced in a consent notification.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedAccount {
    /// Provider account reference.
    pub account_ref: Option<String>,
    /// Masked account number.
    pub masked_number: Option<String>,
    /// FIP the account is held at.
    pub bank_name: Option<String>,
    /// Account type.
    pub account_type: Option<String>,
    /// The provider's record.
    pub raw: Value,
}

impl LinkedAccount {
    fn from_value(value: &Value) -> Self {
        Self {
            account_ref: first_string(value, ACCOUNT_REF_FIELDS),
            masked_number: first_string(value, MASKED_NUMBER_FIELDS),
            bank_name: first_string(value, FIP_FIELDS),
            account_type: first_string(value, &["accType", "accountType", "FIType", "fiType"]),
            raw: value.clone(),
        }
    }
}

/// A processed notification, kept as the dedup fence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider dedup key.
    pub notification_id: String,
    /// Event type as sent.
    pub event_type: String,
    /// Full body.
    pub payload: Value,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// The ledger row for `notification`, or `None` when it has no dedup key.
    #[must_use]
    pub fn for_notification(notification: &Notification) -> Option<Self> {
        notification.notification_id.as_ref().map(|id| Self {
            notification_id: id.clone(),
            event_type: notification.event_type.clone(),
            payload: notification.raw.clone(),
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_consent_status_update() {
        let n = Notification::parse(json!({
            "type": "CONSENT_STATUS_UPDATE",
            "consentId": "c-1",
            "notificationId": "n-1",
            "data": { "status": "ACTIVE", "detail": { "accounts": [
                { "linkRefNumber": "ref-1", "maskedAccNumber": "XX12", "fipId": "FIP", "accType": "SAVINGS" }
            ] } }
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::ConsentStatusUpdate("ACTIVE".into()));
        assert_eq!(n.consent_event(), Some(ConsentEvent::Activated));
        assert_eq!(n.notification_id.as_deref(), Some("n-1"));
        assert_eq!(n.consent_id.as_ref().unwrap().as_str(), "c-1");
        let accounts = n.linked_accounts();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].account_ref.as_deref(), Some("ref-1"));
        assert_eq!(accounts[0].account_type.as_deref(), Some("SAVINGS"));
    }

    #[test]
    fn event_type_alias_and_nested_ids() {
        let n = Notification::parse(json!({
            "eventType": "SESSION_STATUS_UPDATE",
            "data": { "status": "completed", "sessionId": "s-9", "consentId": "c-2", "requestId": "r-1" }
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::SessionStatusUpdate("COMPLETED".into()));
        assert_eq!(n.session_id.as_deref(), Some("s-9"));
        assert_eq!(n.notification_id.as_deref(), Some("r-1"));
        assert_eq!(n.consent_event(), None);
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(Notification::parse(json!({"data": {}})).is_err());
    }

    #[test]
    fn unknown_types_are_classified() {
        let n = Notification::parse(json!({"type": "FI_READY"})).unwrap();
        assert_eq!(n.kind, NotificationKind::Unknown("FI_READY".into()));
        assert!(WebhookEvent::for_notification(&n).is_none());
    }

    #[test]
    fn status_update_without_status_applies_nothing() {
        let n = Notification::parse(json!({"type": "CONSENT_STATUS_UPDATE", "consentId": "c"})).unwrap();
        assert_eq!(n.consent_event(), None);
    }
}
