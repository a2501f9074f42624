use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::document::AuditQueryParams;
use crate::middleware::CurrentSession;
use crate::models::{Action, AuditLogEntry, AuditQuery, PermissionRequest, ResourceType};
use crate::AppState;

/// Compliance report over the audit log.
pub async fn query_audit(
    State(state): State<AppState>,
    current: CurrentSession,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    state
        .rbac
        .require(
            current.principal_id(),
            &PermissionRequest::new(ResourceType::AuditLog, None, Action::View),
        )
        .await?;
    let entries = state.audit.query(&AuditQuery::from(params)).await?;
    Ok(Json(entries))
}
