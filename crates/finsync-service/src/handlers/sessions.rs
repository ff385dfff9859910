//! Data session handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use finsync_core::DateRange;

use crate::auth::AuthUser;
use crate::engine::{self, SessionOutcome, SessionTrigger};
use crate::error::ApiError;
use crate::handlers::consents::{parse_consent_id, SessionView};
use crate::ingest::IngestReport;
use crate::state::AppState;

/// Create data session request.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Consent to request data under.
    pub consent_id: String,
    /// Window start (RFC 3339 or `YYYY-MM-DD`).
    #[serde(default)]
    pub from: Option<String>,
    /// Window end (RFC 3339 or `YYYY-MM-DD`).
    #[serde(default)]
    pub to: Option<String>,
}

/// Create data session response.
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// Always `true`.
    pub ok: bool,
    /// `true` when the consent already had a live ONETIME session.
    pub skipped: bool,
    /// The new session, or the live one when skipped.
    pub session: Option<SessionView>,
}

/// Request a data session for one of the caller's consents.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let consent_id = parse_consent_id(body.consent_id)?;
    engine::owned_consent(&state, auth.user_id, &consent_id).await?;

    let requested = match (body.from.as_deref(), body.to.as_deref()) {
        (Some(from), Some(to)) => Some(DateRange::parse(from, to)?),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "from and to must be given together".into(),
            ))
        }
    };

    let outcome =
        engine::create_session(&state, &consent_id, requested, SessionTrigger::Manual).await?;

    let (status, skipped, session) = match outcome {
        SessionOutcome::Created(session) => (StatusCode::CREATED, false, Some(session)),
        SessionOutcome::Skipped { existing } => (StatusCode::OK, true, existing),
        SessionOutcome::Failed(session) => {
            return Err(ApiError::Provider(session.error.unwrap_or_default()));
        }
    };

    Ok((
        status,
        Json(CreateSessionResponse {
            ok: true,
            skipped,
            session: session.as_ref().map(SessionView::from),
        }),
    ))
}

/// Per-account ingestion summary.
#[derive(Debug, Serialize)]
pub struct IngestSummary {
    /// Accounts in the payload.
    pub accounts: usize,
    /// Transactions inserted.
    pub inserted: usize,
    /// Transactions already stored.
    pub skipped: usize,
    /// Accounts that failed to ingest.
    pub failures: usize,
}

impl From<&IngestReport> for IngestSummary {
    fn from(report: &IngestReport) -> Self {
        Self {
            accounts: report.accounts.len(),
            inserted: report.inserted(),
            skipped: report.skipped(),
            failures: report.failures(),
        }
    }
}

/// Fetch response.
#[derive(Debug, Serialize)]
pub struct FetchSessionResponse {
    /// Always `true`.
    pub ok: bool,
    /// The session after the fetch.
    pub session: SessionView,
    /// What was persisted.
    pub ingest: IngestSummary,
}

/// Fetch and persist a session's FI data.
///
/// Accepts the internal session id or the provider's.
pub async fn fetch_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<FetchSessionResponse>, ApiError> {
    let session = engine::owned_session(&state, auth.user_id, &id).await?;
    let outcome = engine::fetch_and_ingest(&state, session, SessionTrigger::Manual).await?;

    Ok(Json(FetchSessionResponse {
        ok: true,
        session: SessionView::from(&outcome.session),
        ingest: IngestSummary::from(&outcome.report),
    }))
}
