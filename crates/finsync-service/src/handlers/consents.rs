//! Consent handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use finsync_core::{Consent, ConsentId, DataSession, FetchType, SyncError};
use finsync_store::CleanupCounts;

use crate::auth::AuthUser;
use crate::engine::{self, InitiateConsent};
use crate::error::ApiError;
use crate::state::AppState;

/// Longest consent validity accepted from a caller.
const MAX_DURATION_MONTHS: u32 = 60;

/// Consent as returned to its owner.
#[derive(Debug, Serialize)]
pub struct ConsentView {
    /// Provider consent id.
    pub consent_id: String,
    /// Current status.
    pub status: String,
    /// `ONETIME` or `PERIODIC`.
    pub fetch_type: FetchType,
    /// Window start.
    pub from: String,
    /// Window end.
    pub to: String,
    /// Purpose text.
    pub purpose: String,
    /// VUA used at initiation.
    pub vua: Option<String>,
    /// Approval URL.
    pub redirect_url: Option<String>,
    /// Created timestamp.
    pub created_at: String,
    /// Updated timestamp.
    pub updated_at: String,
}

impl From<&Consent> for ConsentView {
    fn from(consent: &Consent) -> Self {
        Self {
            consent_id: consent.consent_id.to_string(),
            status: consent.status.to_string(),
            fetch_type: consent.fetch_type,
            from: consent.date_range.from.to_rfc3339(),
            to: consent.date_range.to.to_rfc3339(),
            purpose: consent.purpose.clone(),
            vua: consent.vua.clone(),
            redirect_url: consent.redirect_url.clone(),
            created_at: consent.created_at.to_rfc3339(),
            updated_at: consent.updated_at.to_rfc3339(),
        }
    }
}

/// Data session as returned to the consent owner.
#[derive(Debug, Serialize)]
pub struct SessionView {
    /// Internal id.
    pub id: String,
    /// Provider session id.
    pub session_id: Option<String>,
    /// Consent id.
    pub consent_id: String,
    /// Current status.
    pub status: String,
    /// Window start.
    pub from: String,
    /// Window end.
    pub to: String,
    /// Failure detail.
    pub error: Option<String>,
    /// When data became ready.
    pub ready_at: Option<String>,
    /// When data was fetched.
    pub fetched_at: Option<String>,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&DataSession> for SessionView {
    fn from(session: &DataSession) -> Self {
        Self {
            id: session.id.to_string(),
            session_id: session.session_id.clone(),
            consent_id: session.consent_id.to_string(),
            status: session.status.to_string(),
            from: session.date_range.from.to_rfc3339(),
            to: session.date_range.to.to_rfc3339(),
            error: session.error.clone(),
            ready_at: session.ready_at.map(|t| t.to_rfc3339()),
            fetched_at: session.fetched_at.map(|t| t.to_rfc3339()),
            created_at: session.created_at.to_rfc3339(),
        }
    }
}

/// Create consent request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConsentRequest {
    /// Virtual user address.
    #[serde(default)]
    pub vua: Option<String>,
    /// `ONETIME` or `PERIODIC`.
    #[serde(default)]
    pub fetch_type: Option<String>,
    /// Purpose text.
    #[serde(default)]
    pub purpose: Option<String>,
    /// Validity in months.
    #[serde(default)]
    pub duration_months: Option<u32>,
    /// Post-approval redirect.
    #[serde(default)]
    pub redirect_url: Option<String>,
}

/// Single consent response.
#[derive(Debug, Serialize)]
pub struct ConsentResponse {
    /// Always `true`.
    pub ok: bool,
    /// The consent.
    pub consent: ConsentView,
}

/// Start account linking: create a consent with Setu.
pub async fn create_consent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateConsentRequest>,
) -> Result<(StatusCode, Json<ConsentResponse>), ApiError> {
    let fetch_type = body
        .fetch_type
        .as_deref()
        .map(str::parse::<FetchType>)
        .transpose()?;

    if let Some(months) = body.duration_months {
        if months == 0 || months > MAX_DURATION_MONTHS {
            return Err(ApiError::BadRequest(format!(
                "duration_months must be between 1 and {MAX_DURATION_MONTHS}"
            )));
        }
    }

    let vua = body.vua.filter(|v| !v.trim().is_empty());

    let consent = engine::initiate_consent(
        &state,
        auth.user_id,
        InitiateConsent {
            vua,
            fetch_type,
            purpose: body.purpose,
            duration_months: body.duration_months,
            redirect_url: body.redirect_url,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ConsentResponse {
            ok: true,
            consent: ConsentView::from(&consent),
        }),
    ))
}

/// List consents response.
#[derive(Debug, Serialize)]
pub struct ListConsentsResponse {
    /// Always `true`.
    pub ok: bool,
    /// The caller's consents, newest first.
    pub consents: Vec<ConsentView>,
}

/// List the caller's consents.
pub async fn list_consents(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ListConsentsResponse>, ApiError> {
    let consents = state.store.list_consents_by_user(&auth.user_id).await?;

    Ok(Json(ListConsentsResponse {
        ok: true,
        consents: consents.iter().map(ConsentView::from).collect(),
    }))
}

/// Consent detail response.
#[derive(Debug, Serialize)]
pub struct ConsentDetailResponse {
    /// Always `true`.
    pub ok: bool,
    /// The consent.
    pub consent: ConsentView,
    /// Its data sessions, oldest first.
    pub sessions: Vec<SessionView>,
}

/// Get one consent with its data sessions.
pub async fn get_consent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(consent_id): Path<String>,
) -> Result<Json<ConsentDetailResponse>, ApiError> {
    let consent_id = parse_consent_id(consent_id)?;
    let consent = engine::owned_consent(&state, auth.user_id, &consent_id).await?;
    let sessions = state.store.list_sessions_by_consent(&consent_id).await?;

    Ok(Json(ConsentDetailResponse {
        ok: true,
        consent: ConsentView::from(&consent),
        sessions: sessions.iter().map(SessionView::from).collect(),
    }))
}

/// Revoke request.
#[derive(Debug, Default, Deserialize)]
pub struct RevokeConsentRequest {
    /// Reason passed on to Setu.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Cleanup counts.
#[derive(Debug, Serialize)]
pub struct CleanupView {
    /// Accounts removed.
    pub accounts: u64,
    /// Transactions removed.
    pub transactions: u64,
}

impl From<CleanupCounts> for CleanupView {
    fn from(counts: CleanupCounts) -> Self {
        Self {
            accounts: counts.accounts,
            transactions: counts.transactions,
        }
    }
}

/// Revoke response.
#[derive(Debug, Serialize)]
pub struct RevokeConsentResponse {
    /// Always `true`.
    pub ok: bool,
    /// The revoked consent.
    pub consent: ConsentView,
    /// Rows removed; `null` when cleanup failed and needs a retry.
    pub cleanup: Option<CleanupView>,
}

/// Revoke a consent and remove its linked data.
pub async fn revoke_consent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(consent_id): Path<String>,
    body: Option<Json<RevokeConsentRequest>>,
) -> Result<Json<RevokeConsentResponse>, ApiError> {
    let consent_id = parse_consent_id(consent_id)?;
    let reason = body.and_then(|Json(b)| b.reason);

    let outcome =
        engine::revoke_consent(&state, auth.user_id, &consent_id, reason.as_deref()).await?;

    Ok(Json(RevokeConsentResponse {
        ok: true,
        consent: ConsentView::from(&outcome.consent),
        cleanup: outcome.cleanup.map(CleanupView::from),
    }))
}

pub(crate) fn parse_consent_id(raw: String) -> Result<ConsentId, ApiError> {
    ConsentId::new(raw).map_err(|e| SyncError::from(e).into())
}
