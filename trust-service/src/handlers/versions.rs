use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Duration;
use service_core::error::AppError;

use super::documents::{recipient_for, require_document};
use crate::dtos::document::{
    ApproveRequest, ContentQuery, CreateVersionRequest, LockRequest, ReleaseLockQuery,
    VersionContentResponse,
};
use crate::middleware::CurrentSession;
use crate::models::{AccessAction, Action, DocumentLock, DocumentVersion};
use crate::services::watermark::WatermarkSpec;
use crate::services::{ServiceError, VersionDraft};
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn get_lock(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentLock>, AppError> {
    require_document(&state, &current, &document_id, Action::View).await?;
    let lock = state
        .versions
        .get_lock(&document_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Lock"))?;
    Ok(Json(lock))
}

#[tracing::instrument(skip(state, current, req), fields(document_id = %document_id))]
pub async fn acquire_lock(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    ValidatedJson(req): ValidatedJson<LockRequest>,
) -> Result<Json<DocumentLock>, AppError> {
    require_document(&state, &current, &document_id, Action::Edit).await?;
    let lock = state
        .versions
        .acquire_lock(
            &current.actor(),
            &document_id,
            req.lock_type,
            req.ttl_minutes.map(Duration::minutes),
            req.reason,
        )
        .await?;
    Ok(Json(lock))
}

/// `?force=true` overrides another holder's lock and needs manage rights.
pub async fn release_lock(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    Query(query): Query<ReleaseLockQuery>,
) -> Result<StatusCode, AppError> {
    if query.force {
        require_document(&state, &current, &document_id, Action::Manage).await?;
        state
            .versions
            .force_release_lock(&current.actor(), &document_id)
            .await?;
    } else {
        state
            .versions
            .release_lock(&current.actor(), &document_id)
            .await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, current, req), fields(document_id = %document_id))]
pub async fn create_version(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    ValidatedJson(req): ValidatedJson<CreateVersionRequest>,
) -> Result<(StatusCode, Json<DocumentVersion>), AppError> {
    require_document(&state, &current, &document_id, Action::Edit).await?;
    let version = state
        .versions
        .create_version(
            &current.actor(),
            &document_id,
            VersionDraft {
                title: req.title,
                content_type: req.content_type,
                content: req.content.into_bytes(),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn list_versions(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
) -> Result<Json<Vec<DocumentVersion>>, AppError> {
    require_document(&state, &current, &document_id, Action::View).await?;
    let versions = state.versions.list_versions(&document_id).await?;
    Ok(Json(versions))
}

pub async fn get_version(
    State(state): State<AppState>,
    current: CurrentSession,
    Path((document_id, version_id)): Path<(String, String)>,
) -> Result<Json<DocumentVersion>, AppError> {
    require_document(&state, &current, &document_id, Action::View).await?;
    let version = state.versions.get_version(&document_id, &version_id).await?;
    Ok(Json(version))
}

/// Decrypts a version for the caller. The DLP gate applies and the read is
/// logged as a view.
pub async fn version_content(
    State(state): State<AppState>,
    current: CurrentSession,
    Path((document_id, version_id)): Path<(String, String)>,
    Query(query): Query<ContentQuery>,
) -> Result<Json<VersionContentResponse>, AppError> {
    require_document(&state, &current, &document_id, Action::View).await?;
    let ctx = current.access_context();
    let decision = state
        .security
        .can_perform_action(&document_id, current.principal_id(), AccessAction::View)
        .await?;
    if let Some(reason) = decision.reason.filter(|_| !decision.allowed) {
        state
            .security
            .record_denial(&ctx, &document_id, AccessAction::View, reason.as_str())
            .await;
        return Err(ServiceError::from(reason).into());
    }

    let bytes = state
        .versions
        .version_content(&ctx, &document_id, &version_id)
        .await?;
    let mut content = String::from_utf8_lossy(&bytes).into_owned();
    if query.watermark {
        let recipient = recipient_for(&state, &current).await?;
        content = state.security.apply_watermark(
            &document_id,
            &content,
            &WatermarkSpec::default(),
            &recipient,
        )?;
    }
    Ok(Json(VersionContentResponse {
        version_id,
        content,
    }))
}

pub async fn submit_version(
    State(state): State<AppState>,
    current: CurrentSession,
    Path((document_id, version_id)): Path<(String, String)>,
) -> Result<Json<DocumentVersion>, AppError> {
    require_document(&state, &current, &document_id, Action::Edit).await?;
    let version = state
        .versions
        .submit_for_review(&current.actor(), &document_id, &version_id)
        .await?;
    Ok(Json(version))
}

#[tracing::instrument(skip(state, current, req), fields(document_id = %document_id, version_id = %version_id))]
pub async fn approve_version(
    State(state): State<AppState>,
    current: CurrentSession,
    Path((document_id, version_id)): Path<(String, String)>,
    ValidatedJson(req): ValidatedJson<ApproveRequest>,
) -> Result<Json<DocumentVersion>, AppError> {
    require_document(&state, &current, &document_id, Action::Approve).await?;
    let version = state
        .versions
        .approve_version(&current.actor(), &document_id, &version_id, req.comments)
        .await?;
    Ok(Json(version))
}
