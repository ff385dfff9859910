//! Consent and data-session orchestration.
//!
//! Every function re-reads the rows it is about to change, applies the
//! status transition functions from `finsync_core`, then performs the
//! provider calls and writes that follow. Nothing here caches state between
//! calls, so webhook deliveries survive restarts and arrive in any order.

use chrono::Utc;
use serde::Serialize;

use finsync_core::{
    provider_session_event, Consent, ConsentEvent, ConsentId, ConsentStatus, DataSession,
    DataSessionId, DateRange, FetchType, Notification, NotificationKind, SessionEvent,
    SessionStatus, SyncError, TransitionError, UserId, DEFAULT_LOOKBACK_MONTHS,
};
use finsync_setu::{ConsentInput, SetuError};
use finsync_store::{CleanupCounts, StoreError};

use crate::ingest::{ingest_payload, upsert_linked_accounts, IngestReport};
use crate::state::AppState;

/// Errors raised while driving consents and sessions.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No consent with this id (or not owned by the caller).
    #[error("consent not found: {0}")]
    ConsentNotFound(ConsentId),

    /// No data session with this id (or not owned by the caller).
    #[error("data session not found: {0}")]
    SessionNotFound(String),

    /// The session was never accepted by the provider, so it has no data.
    #[error("data session {0} has no provider session id")]
    NotSubmitted(DataSessionId),

    /// Caller input failed validation.
    #[error(transparent)]
    Invalid(#[from] SyncError),

    /// The current status does not allow the operation.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Setu call failed.
    #[error(transparent)]
    Provider(#[from] SetuError),

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What started a session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTrigger {
    /// A user request; failures are returned to the caller.
    Manual,
    /// A provider notification; failures are recorded on the session.
    Webhook,
}

/// Parameters for starting a consent.
#[derive(Debug, Clone, Default)]
pub struct InitiateConsent {
    /// Virtual user address (`9999999999@onemoney`).
    pub vua: Option<String>,
    /// Fetch type, `PERIODIC` when omitted.
    pub fetch_type: Option<FetchType>,
    /// Purpose text; the configured default when omitted.
    pub purpose: Option<String>,
    /// Consent validity in months; the configured default when omitted.
    pub duration_months: Option<u32>,
    /// Post-approval redirect; the configured default when omitted.
    pub redirect_url: Option<String>,
}

/// Result of a session creation attempt.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// A session was created and accepted by the provider.
    Created(DataSession),
    /// The consent already holds a live ONETIME session.
    Skipped {
        /// The live session, when it could be read back.
        existing: Option<DataSession>,
    },
    /// The provider rejected the request; the session was stored as `FAILED`.
    Failed(DataSession),
}

/// Result of a data fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    /// The session after the fetch.
    pub session: DataSession,
    /// Per-account ingestion results.
    pub report: IngestReport,
}

/// Result of a user revoke.
#[derive(Debug, Clone)]
pub struct RevokeOutcome {
    /// The consent after the revoke.
    pub consent: Consent,
    /// Rows removed, or `None` when cleanup failed.
    pub cleanup: Option<CleanupCounts>,
}

// ============================================================================
// Consents
// ============================================================================

/// Ask Setu for a consent on behalf of `user_id` and store it.
///
/// The consent window runs from six months back through the requested
/// validity, so every later session window fits inside it.
///
/// # Errors
///
/// Returns `EngineError::Provider` if Setu rejects the request.
pub async fn initiate_consent(
    state: &AppState,
    user_id: UserId,
    request: InitiateConsent,
) -> Result<Consent, EngineError> {
    let config = &state.config;
    let now = Utc::now();
    let duration_months = request
        .duration_months
        .unwrap_or(config.consent_duration_months);

    let input = ConsentInput {
        vua: request.vua,
        data_range: DateRange::consent_window(now, DEFAULT_LOOKBACK_MONTHS, duration_months),
        duration_months,
        fetch_type: request.fetch_type.unwrap_or(FetchType::Periodic),
        purpose: request
            .purpose
            .unwrap_or_else(|| config.consent_purpose.clone()),
        redirect_url: request
            .redirect_url
            .or_else(|| config.consent_redirect_url.clone()),
    };

    let response = state.setu.create_consent(&input).await?;
    let consent_id = ConsentId::new(response.id).map_err(SyncError::from)?;

    let consent = Consent {
        consent_id,
        user_id,
        status: ConsentStatus::from_provider(&response.status),
        fetch_type: input.fetch_type,
        date_range: input.data_range,
        purpose: input.purpose,
        vua: input.vua,
        redirect_url: response.url,
        raw: response.raw,
        created_at: now,
        updated_at: now,
    };
    state.store.upsert_consent(&consent).await?;

    tracing::info!(
        consent_id = %consent.consent_id,
        user_id = %user_id,
        fetch_type = %consent.fetch_type,
        status = %consent.status,
        "Consent initiated"
    );
    Ok(consent)
}

/// Apply a consent notification.
///
/// Activation records any linked accounts in the payload and, when
/// configured, requests a data session. Revocation removes the consent's
/// accounts and transactions. Events for unknown or revoked consents are
/// logged and dropped.
///
/// # Errors
///
/// Returns `EngineError::Store` if the consent cannot be read or written.
pub async fn apply_consent_event(
    state: &AppState,
    notification: &Notification,
) -> Result<(), EngineError> {
    let (Some(consent_id), Some(event)) =
        (notification.consent_id.as_ref(), notification.consent_event())
    else {
        tracing::info!(
            event_type = %notification.event_type,
            "Consent notification carries nothing to apply"
        );
        return Ok(());
    };

    let Some(mut consent) = state.store.get_consent(consent_id).await? else {
        tracing::warn!(consent_id = %consent_id, "Notification for unknown consent, skipping");
        return Ok(());
    };

    let next = match consent.status.apply(&event) {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(consent_id = %consent_id, error = %e, "Consent event rejected");
            return Ok(());
        }
    };

    state
        .store
        .update_consent_status(consent_id, &next, &notification.raw)
        .await?;
    tracing::info!(
        consent_id = %consent_id,
        from = %consent.status,
        to = %next,
        "Consent status updated"
    );
    consent.status = next;
    consent.raw = notification.raw.clone();

    match event {
        ConsentEvent::Activated => on_activated(state, &consent, notification).await,
        ConsentEvent::Revoked => {
            cleanup_consent_data(state, consent_id).await;
        }
        ConsentEvent::Reported(_) => {}
    }

    Ok(())
}

async fn on_activated(state: &AppState, consent: &Consent, notification: &Notification) {
    let linked = notification.linked_accounts();
    if !linked.is_empty() {
        let outcomes = upsert_linked_accounts(state.store.as_ref(), consent, &linked).await;
        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        tracing::info!(
            consent_id = %consent.consent_id,
            linked = outcomes.len(),
            failed,
            "Linked accounts recorded"
        );
    }

    if !state.config.session_on_consent_active {
        return;
    }

    match create_session(state, &consent.consent_id, None, SessionTrigger::Webhook).await {
        Ok(SessionOutcome::Created(session)) => {
            tracing::info!(
                consent_id = %consent.consent_id,
                data_session_id = %session.id,
                "Data session requested after activation"
            );
        }
        Ok(SessionOutcome::Skipped { .. }) => {}
        Ok(SessionOutcome::Failed(session)) => {
            tracing::warn!(
                consent_id = %consent.consent_id,
                data_session_id = %session.id,
                error = ?session.error,
                "Data session request after activation failed"
            );
        }
        Err(e) => {
            tracing::error!(
                consent_id = %consent.consent_id,
                error = %e,
                "Could not request data session after activation"
            );
        }
    }
}

/// Revoke a consent owned by `user_id`.
///
/// Revoking an already revoked consent skips the provider call. Cleanup of
/// accounts and transactions is best-effort: a failure is logged and
/// reported in the outcome, and the status stays `REVOKED`.
///
/// # Errors
///
/// Returns `EngineError::ConsentNotFound` if the user owns no such consent,
/// or `EngineError::Provider` if Setu rejects the revoke.
pub async fn revoke_consent(
    state: &AppState,
    user_id: UserId,
    consent_id: &ConsentId,
    reason: Option<&str>,
) -> Result<RevokeOutcome, EngineError> {
    let mut consent = owned_consent(state, user_id, consent_id).await?;

    if consent.status == ConsentStatus::Revoked {
        tracing::info!(consent_id = %consent_id, "Consent already revoked");
    } else {
        let raw = state.setu.revoke_consent(consent_id, reason).await?;
        state
            .store
            .update_consent_status(consent_id, &ConsentStatus::Revoked, &raw)
            .await?;
        tracing::info!(consent_id = %consent_id, user_id = %user_id, "Consent revoked");
        consent.status = ConsentStatus::Revoked;
        consent.raw = raw;
        consent.updated_at = Utc::now();
    }

    let cleanup = cleanup_consent_data(state, consent_id).await;
    Ok(RevokeOutcome { consent, cleanup })
}

async fn cleanup_consent_data(state: &AppState, consent_id: &ConsentId) -> Option<CleanupCounts> {
    match state.store.delete_consent_data(consent_id).await {
        Ok(counts) => {
            tracing::info!(
                consent_id = %consent_id,
                accounts = counts.accounts,
                transactions = counts.transactions,
                "Consent data removed"
            );
            Some(counts)
        }
        Err(e) => {
            tracing::error!(consent_id = %consent_id, error = %e, "Consent data cleanup failed");
            None
        }
    }
}

/// Load a consent, hiding consents of other users.
///
/// # Errors
///
/// Returns `EngineError::ConsentNotFound` if the consent is missing or owned
/// by someone else.
pub async fn owned_consent(
    state: &AppState,
    user_id: UserId,
    consent_id: &ConsentId,
) -> Result<Consent, EngineError> {
    match state.store.get_consent(consent_id).await? {
        Some(consent) if consent.user_id == user_id => Ok(consent),
        _ => Err(EngineError::ConsentNotFound(consent_id.clone())),
    }
}

// ============================================================================
// Data sessions
// ============================================================================

/// Request a data session under `consent_id`.
///
/// The window defaults to the trailing six months and is clamped into the
/// consent's own window. ONETIME consents hold at most one live session:
/// the row is reserved before Setu is called, and a second attempt while it
/// is live is skipped. A provider failure marks the reservation `FAILED`;
/// webhook-triggered calls get that back as `SessionOutcome::Failed`, manual
/// calls as an error.
///
/// # Errors
///
/// Returns `EngineError::ConsentNotFound`, `EngineError::Invalid` when the
/// clamped window is empty, `EngineError::Transition` for a revoked consent,
/// or `EngineError::Provider` on a failed manual request.
pub async fn create_session(
    state: &AppState,
    consent_id: &ConsentId,
    requested: Option<DateRange>,
    trigger: SessionTrigger,
) -> Result<SessionOutcome, EngineError> {
    let consent = state
        .store
        .get_consent(consent_id)
        .await?
        .ok_or_else(|| EngineError::ConsentNotFound(consent_id.clone()))?;

    if consent.status.is_terminal() {
        return Err(TransitionError {
            entity: "consent",
            from: consent.status.to_string(),
            event: "session request".into(),
        }
        .into());
    }

    let window = requested
        .unwrap_or_else(|| DateRange::trailing_months(Utc::now(), DEFAULT_LOOKBACK_MONTHS))
        .clamp_to(&consent.date_range)?;

    let mut session =
        DataSession::reserve(consent_id.clone(), window, consent.fetch_type.is_exclusive());
    if !state.store.reserve_session(&session).await? {
        let existing = state
            .store
            .list_sessions_by_consent(consent_id)
            .await?
            .into_iter()
            .find(|s| s.exclusive && s.status.is_live());
        tracing::info!(
            consent_id = %consent_id,
            existing = ?existing.as_ref().map(|s| s.id),
            "ONETIME consent already has a live session, skipping"
        );
        return Ok(SessionOutcome::Skipped { existing });
    }

    match state.setu.create_session(consent_id, Some(&window)).await {
        Ok(response) => {
            session.session_id = Some(response.id);
            session.raw = response.raw;
            session.updated_at = Utc::now();
            state.store.put_session(&session).await?;
            tracing::info!(
                consent_id = %consent_id,
                data_session_id = %session.id,
                session_id = ?session.session_id,
                "Data session created"
            );
            Ok(SessionOutcome::Created(session))
        }
        Err(e) => {
            session.fail(e.to_string())?;
            state.store.put_session(&session).await?;
            tracing::warn!(
                consent_id = %consent_id,
                data_session_id = %session.id,
                error = %e,
                "Data session request failed"
            );
            match trigger {
                SessionTrigger::Webhook => Ok(SessionOutcome::Failed(session)),
                SessionTrigger::Manual => Err(e.into()),
            }
        }
    }
}

/// Apply a `SESSION_STATUS_UPDATE` notification.
///
/// `COMPLETED`/`PARTIAL` marks the session ready and fetches its data. A
/// session already `FETCHED` (after a `PARTIAL`) is fetched again and stays
/// `FETCHED`. `FAILED`/`ERROR` marks it failed. Other statuses and unknown sessions are
/// logged and ignored.
///
/// # Errors
///
/// Returns `EngineError::Store` if the session cannot be read or written.
pub async fn apply_session_status(
    state: &AppState,
    notification: &Notification,
) -> Result<(), EngineError> {
    let NotificationKind::SessionStatusUpdate(status) = &notification.kind else {
        return Ok(());
    };
    let Some(event) = provider_session_event(status) else {
        tracing::info!(status = %status, "Session status needs no action");
        return Ok(());
    };
    let Some(provider_id) = notification.session_id.as_deref() else {
        tracing::warn!(status = %status, "Session notification without session id");
        return Ok(());
    };
    let Some(mut session) = state.store.get_session_by_provider_id(provider_id).await? else {
        tracing::warn!(session_id = %provider_id, "Notification for unknown data session, skipping");
        return Ok(());
    };

    if event == SessionEvent::Failed {
        if let Err(e) = session.fail(format!("provider reported {status}")) {
            tracing::warn!(data_session_id = %session.id, error = %e, "Session event rejected");
            return Ok(());
        }
        session.raw = notification.raw.clone();
        state.store.put_session(&session).await?;
        tracing::info!(data_session_id = %session.id, status = %status, "Data session failed");
        return Ok(());
    }

    if session.status == SessionStatus::Fetched {
        // More data after a PARTIAL fetch; refetching is idempotent.
        tracing::info!(
            data_session_id = %session.id,
            status = %status,
            "Data ready again for fetched session, refetching"
        );
    } else {
        if let Err(e) = session.transition(SessionEvent::DataReady) {
            tracing::warn!(data_session_id = %session.id, error = %e, "Session event rejected");
            return Ok(());
        }
        state.store.put_session(&session).await?;
        tracing::info!(data_session_id = %session.id, "Data session ready");
    }

    match fetch_and_ingest(state, session, SessionTrigger::Webhook).await {
        Ok(_) | Err(EngineError::Provider(_)) => Ok(()),
        Err(EngineError::Store(e)) => Err(e.into()),
        Err(e) => {
            tracing::warn!(session_id = %provider_id, error = %e, "Data fetch skipped");
            Ok(())
        }
    }
}

/// Fetch a session's FI data from Setu and persist it.
///
/// On success the session becomes `FETCHED` and keeps the payload. When a
/// webhook-triggered fetch fails the session is marked `FAILED`; a failed
/// manual fetch leaves it unchanged.
///
/// # Errors
///
/// Returns `EngineError::Transition` if the session cannot be fetched from
/// its current status, `EngineError::NotSubmitted` if it has no provider id,
/// or `EngineError::Provider` if Setu fails.
pub async fn fetch_and_ingest(
    state: &AppState,
    mut session: DataSession,
    trigger: SessionTrigger,
) -> Result<FetchOutcome, EngineError> {
    session.status.apply(SessionEvent::Fetched)?;
    let provider_id = session
        .session_id
        .clone()
        .ok_or(EngineError::NotSubmitted(session.id))?;
    let consent = state
        .store
        .get_consent(&session.consent_id)
        .await?
        .ok_or_else(|| EngineError::ConsentNotFound(session.consent_id.clone()))?;

    let payload = match state.setu.fetch_session_data(&provider_id).await {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(
                data_session_id = %session.id,
                session_id = %provider_id,
                error = %e,
                "FI data fetch failed"
            );
            if trigger == SessionTrigger::Webhook {
                mark_failed(state, &mut session, &e.to_string()).await?;
            }
            return Err(e.into());
        }
    };

    let report = ingest_payload(state.store.as_ref(), &consent, &payload).await;

    session.transition(SessionEvent::Fetched)?;
    session.raw = payload;
    state.store.put_session(&session).await?;
    tracing::info!(
        data_session_id = %session.id,
        accounts = report.accounts.len(),
        inserted = report.inserted(),
        "Data session fetched"
    );

    Ok(FetchOutcome { session, report })
}

async fn mark_failed(
    state: &AppState,
    session: &mut DataSession,
    error: &str,
) -> Result<(), EngineError> {
    match session.fail(error) {
        Ok(()) => {
            state.store.put_session(session).await?;
            Ok(())
        }
        Err(e) => {
            tracing::warn!(data_session_id = %session.id, error = %e, "Session already finished");
            Ok(())
        }
    }
}

/// Load a session by internal id or provider id, hiding sessions of
/// consents owned by other users.
///
/// # Errors
///
/// Returns `EngineError::SessionNotFound` if nothing matches.
pub async fn owned_session(
    state: &AppState,
    user_id: UserId,
    id: &str,
) -> Result<DataSession, EngineError> {
    let session = match id.parse::<DataSessionId>() {
        Ok(internal) => state.store.get_session(&internal).await?,
        Err(_) => None,
    };
    let session = match session {
        Some(session) => Some(session),
        None => state.store.get_session_by_provider_id(id).await?,
    };
    let not_found = || EngineError::SessionNotFound(id.to_string());
    let session = session.ok_or_else(not_found)?;

    match state.store.get_consent(&session.consent_id).await? {
        Some(consent) if consent.user_id == user_id => Ok(session),
        _ => Err(not_found()),
    }
}

/// Route a parsed notification to the consent or session machine.
///
/// # Errors
///
/// Returns whatever the selected handler returns.
pub async fn dispatch(state: &AppState, notification: &Notification) -> Result<(), EngineError> {
    match &notification.kind {
        NotificationKind::ConsentApproved
        | NotificationKind::ConsentRevoked
        | NotificationKind::ConsentStatusUpdate(_) => apply_consent_event(state, notification).await,
        NotificationKind::SessionStatusUpdate(_) => apply_session_status(state, notification).await,
        NotificationKind::Unknown(event_type) => {
            tracing::info!(event_type = %event_type, "Ignoring unknown notification type");
            Ok(())
        }
    }
}

