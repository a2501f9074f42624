use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use service_core::error::AppError;

use crate::dtos::session::{CreateSessionRequest, RefreshResponse};
use crate::middleware::{ClientIp, CurrentSession};
use crate::models::{NewSession, Session};
use crate::utils::ValidatedJson;
use crate::AppState;

#[tracing::instrument(skip(state, headers, req), fields(principal_id = %req.principal_id))]
pub async fn create_session(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let session = state
        .sessions
        .create_session(NewSession {
            principal_id: req.principal_id,
            role: req.role,
            device_fingerprint: req.device_fingerprint,
            ip_address: ip,
            user_agent,
            mfa_verified: req.mfa_verified,
            verification_id: req.verification_id,
            trusted_device: req.trusted_device,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn current_session(current: CurrentSession) -> Json<Session> {
    Json(current.session)
}

pub async fn refresh_session(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<Json<RefreshResponse>, AppError> {
    let expires_at = state
        .sessions
        .refresh_session(&current.session.id, &current.session.device_fingerprint)
        .await?;
    Ok(Json(RefreshResponse { expires_at }))
}

pub async fn destroy_session(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<StatusCode, AppError> {
    state
        .sessions
        .destroy_session(&current.actor(), &current.session.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Signs the principal out everywhere, this session included.
pub async fn destroy_all_sessions(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<Json<serde_json::Value>, AppError> {
    let ended = state
        .sessions
        .destroy_all_sessions(&current.actor(), current.principal_id())
        .await?;
    Ok(Json(serde_json::json!({ "sessions_ended": ended })))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<Json<Vec<Session>>, AppError> {
    let sessions = state.sessions.list_sessions(current.principal_id()).await?;
    Ok(Json(sessions))
}
