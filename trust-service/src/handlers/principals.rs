use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::principal::{
    AssignRoleRequest, GrantRequest, GrantResponse, PermissionCheckRequest,
    PermissionCheckResponse, RegisterPrincipalRequest,
};
use crate::middleware::CurrentSession;
use crate::models::{Action, NewPrincipal, PermissionGrant, PermissionRequest, Principal, ResourceType, Role};
use crate::services::Actor;
use crate::utils::ValidatedJson;
use crate::AppState;

fn manage_principals() -> PermissionRequest {
    PermissionRequest::new(ResourceType::Principal, None, Action::Manage)
}

#[tracing::instrument(skip(state, req))]
pub async fn register_principal(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterPrincipalRequest>,
) -> Result<(StatusCode, Json<Principal>), AppError> {
    let new = NewPrincipal {
        id: None,
        email: req.email,
        display_name: req.display_name,
        role: Role::Viewer,
    };
    let actor = Actor::new("self-registration");
    let principal = state.rbac.register_principal(&actor, new).await?;
    Ok((StatusCode::CREATED, Json(principal)))
}

#[tracing::instrument(skip(state, current, req), fields(principal_id = %principal_id))]
pub async fn assign_role(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(principal_id): Path<String>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<Json<Principal>, AppError> {
    state
        .rbac
        .require(current.principal_id(), &manage_principals())
        .await?;
    let principal = state
        .rbac
        .assign_role(&current.actor(), &principal_id, req.role)
        .await?;
    Ok(Json(principal))
}

#[tracing::instrument(skip(state, current), fields(principal_id = %principal_id))]
pub async fn deactivate_principal(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(principal_id): Path<String>,
) -> Result<Json<Principal>, AppError> {
    state
        .rbac
        .require(current.principal_id(), &manage_principals())
        .await?;
    let principal = state
        .rbac
        .deactivate_principal(&current.actor(), &principal_id)
        .await?;
    Ok(Json(principal))
}

/// Checking someone else's permissions needs principal management rights.
pub async fn check_permission(
    State(state): State<AppState>,
    current: CurrentSession,
    ValidatedJson(req): ValidatedJson<PermissionCheckRequest>,
) -> Result<Json<PermissionCheckResponse>, AppError> {
    let principal_id = req
        .principal_id
        .clone()
        .unwrap_or_else(|| current.principal_id().to_string());
    if principal_id != current.principal_id() {
        state
            .rbac
            .require(current.principal_id(), &manage_principals())
            .await?;
    }
    let allowed = state.rbac.has_permission(&principal_id, &req.request()).await?;
    Ok(Json(PermissionCheckResponse {
        principal_id,
        allowed,
    }))
}

pub async fn grant_permission(
    State(state): State<AppState>,
    current: CurrentSession,
    ValidatedJson(req): ValidatedJson<GrantRequest>,
) -> Result<(StatusCode, Json<GrantResponse>), AppError> {
    state
        .rbac
        .require(current.principal_id(), &manage_principals())
        .await?;
    let created = state
        .rbac
        .grant_permission(&current.actor(), PermissionGrant::from(req))
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(GrantResponse { created })))
}

pub async fn revoke_permission(
    State(state): State<AppState>,
    current: CurrentSession,
    ValidatedJson(req): ValidatedJson<GrantRequest>,
) -> Result<StatusCode, AppError> {
    state
        .rbac
        .require(current.principal_id(), &manage_principals())
        .await?;
    state
        .rbac
        .revoke_permission(&current.actor(), &PermissionGrant::from(req))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
