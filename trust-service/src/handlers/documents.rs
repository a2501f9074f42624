//! Document security handlers: DLP scans, the policy gate, access logging
//! and watermarking.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::document::{
    AccessRequest, ExtractWatermarkRequest, ScanRequest, WatermarkRequest, WatermarkResponse,
};
use crate::middleware::CurrentSession;
use crate::models::{
    AccessSummary, Action, DlpScanResult, DocumentAccessEvent, DocumentPolicy, PermissionRequest,
    ResourceType,
};
use crate::services::watermark::{RecipientInfo, WatermarkTag};
use crate::services::{AccessDecision, ServiceError};
use crate::utils::ValidatedJson;
use crate::AppState;

pub(crate) async fn require_document(
    state: &AppState,
    current: &CurrentSession,
    document_id: &str,
    action: Action,
) -> Result<(), ServiceError> {
    state
        .rbac
        .require(
            current.principal_id(),
            &PermissionRequest::document(document_id, action),
        )
        .await
}

pub(crate) async fn recipient_for(
    state: &AppState,
    current: &CurrentSession,
) -> Result<RecipientInfo, ServiceError> {
    let principal = state.rbac.get_principal(current.principal_id()).await?;
    Ok(RecipientInfo {
        principal_id: principal.id,
        name: principal.display_name,
        email: principal.email,
        ip_address: current.ip_address.clone(),
    })
}

#[tracing::instrument(skip(state, current, req), fields(document_id = %document_id))]
pub async fn scan_document(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    ValidatedJson(req): ValidatedJson<ScanRequest>,
) -> Result<Json<DlpScanResult>, AppError> {
    require_document(&state, &current, &document_id, Action::Edit).await?;
    let result = state
        .security
        .scan(&current.actor(), &document_id, &req.content)
        .await?;
    Ok(Json(result))
}

pub async fn get_scan(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
) -> Result<Json<DlpScanResult>, AppError> {
    require_document(&state, &current, &document_id, Action::View).await?;
    let result = state
        .security
        .get_scan(&document_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("DLP scan"))?;
    Ok(Json(result))
}

pub async fn review_scan(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
) -> Result<Json<DlpScanResult>, AppError> {
    require_document(&state, &current, &document_id, Action::Approve).await?;
    let result = state
        .security
        .review_scan(&current.actor(), &document_id)
        .await?;
    Ok(Json(result))
}

pub async fn get_policy(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentPolicy>, AppError> {
    require_document(&state, &current, &document_id, Action::View).await?;
    let policy = state.security.policy_for(&document_id).await?;
    Ok(Json(policy))
}

/// Only document managers may change the restrictions the gate enforces.
#[tracing::instrument(skip(state, current, policy), fields(document_id = %document_id))]
pub async fn set_policy(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    Json(policy): Json<DocumentPolicy>,
) -> Result<Json<DocumentPolicy>, AppError> {
    require_document(&state, &current, &document_id, Action::Manage).await?;
    let policy = state
        .security
        .set_policy(&current.actor(), &document_id, policy)
        .await?;
    Ok(Json(policy))
}

/// Dry run of the gate: RBAC first, then the stored document policy.
pub async fn authorize_action(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    Json(req): Json<AccessRequest>,
) -> Result<Json<AccessDecision>, AppError> {
    require_document(&state, &current, &document_id, req.action.required_permission()).await?;
    let decision = state
        .security
        .can_perform_action(&document_id, current.principal_id(), req.action)
        .await?;
    Ok(Json(decision))
}

/// Gated access: the action is only logged when every check passes.
#[tracing::instrument(skip(state, current, req), fields(document_id = %document_id, action = req.action.as_str()))]
pub async fn log_access(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    Json(req): Json<AccessRequest>,
) -> Result<(StatusCode, Json<DocumentAccessEvent>), AppError> {
    let ctx = current.access_context();
    if let Err(e) =
        require_document(&state, &current, &document_id, req.action.required_permission()).await
    {
        state
            .security
            .record_denial(&ctx, &document_id, req.action, "permission_denied")
            .await;
        return Err(e.into());
    }

    let decision = state
        .security
        .can_perform_action(&document_id, current.principal_id(), req.action)
        .await?;
    if let Some(reason) = decision.reason.filter(|_| !decision.allowed) {
        state
            .security
            .record_denial(&ctx, &document_id, req.action, reason.as_str())
            .await;
        return Err(ServiceError::from(reason).into());
    }

    let event = state
        .security
        .log_access(&document_id, req.action, &ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn access_summary(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
) -> Result<Json<AccessSummary>, AppError> {
    state
        .rbac
        .require(
            current.principal_id(),
            &PermissionRequest::new(ResourceType::AuditLog, None, Action::View),
        )
        .await?;
    let summary = state.security.access_summary(&document_id).await?;
    Ok(Json(summary))
}

pub async fn watermark_content(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    ValidatedJson(req): ValidatedJson<WatermarkRequest>,
) -> Result<Json<WatermarkResponse>, AppError> {
    require_document(&state, &current, &document_id, Action::View).await?;
    let recipient = recipient_for(&state, &current).await?;
    let content = state
        .security
        .apply_watermark(&document_id, &req.content, &req.spec, &recipient)?;
    Ok(Json(WatermarkResponse { content }))
}

/// Identifies the recipient of a leaked copy.
pub async fn extract_watermark(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(document_id): Path<String>,
    ValidatedJson(req): ValidatedJson<ExtractWatermarkRequest>,
) -> Result<Json<WatermarkTag>, AppError> {
    state
        .rbac
        .require(
            current.principal_id(),
            &PermissionRequest::new(ResourceType::AuditLog, None, Action::View),
        )
        .await?;
    let tag = state
        .security
        .extract_watermark(&document_id, &req.content)
        .ok_or_else(|| ServiceError::not_found("Watermark tag"))?;
    Ok(Json(tag))
}
