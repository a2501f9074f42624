use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Action, PermissionGrant, PermissionRequest, ResourceType, Role};

/// Self-service signup. New principals always start as viewers.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterPrincipalRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 200, message = "Display name is required"))]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PermissionCheckRequest {
    /// Defaults to the caller.
    pub principal_id: Option<String>,
    pub resource_type: ResourceType,
    #[validate(length(min = 1))]
    pub resource_id: Option<String>,
    pub action: Action,
}

impl PermissionCheckRequest {
    pub fn request(&self) -> PermissionRequest {
        PermissionRequest::new(self.resource_type, self.resource_id.as_deref(), self.action)
    }
}

#[derive(Debug, Serialize)]
pub struct PermissionCheckResponse {
    pub principal_id: String,
    pub allowed: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantRequest {
    #[validate(length(min = 1, message = "principal_id is required"))]
    pub principal_id: String,
    pub resource_type: ResourceType,
    #[validate(length(min = 1))]
    pub resource_id: Option<String>,
    pub action: Action,
}

impl From<GrantRequest> for PermissionGrant {
    fn from(req: GrantRequest) -> Self {
        PermissionGrant {
            principal_id: req.principal_id,
            resource_type: req.resource_type,
            resource_id: req.resource_id,
            action: req.action,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub created: bool,
}
