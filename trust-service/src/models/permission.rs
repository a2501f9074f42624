//! RBAC vocabulary: roles, resource types, actions and direct grants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Analyst,
    Reviewer,
    Viewer,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Analyst => "analyst",
            Role::Reviewer => "reviewer",
            Role::Viewer => "viewer",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "analyst" => Ok(Role::Analyst),
            "reviewer" => Ok(Role::Reviewer),
            "viewer" => Ok(Role::Viewer),
            "guest" => Ok(Role::Guest),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Document,
    DataRoom,
    Ddq,
    Principal,
    AuditLog,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Document => "document",
            ResourceType::DataRoom => "data_room",
            ResourceType::Ddq => "ddq",
            ResourceType::Principal => "principal",
            ResourceType::AuditLog => "audit_log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Download,
    Print,
    Share,
    Edit,
    Create,
    Delete,
    Approve,
    Manage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Download => "download",
            Action::Print => "print",
            Action::Share => "share",
            Action::Edit => "edit",
            Action::Create => "create",
            Action::Delete => "delete",
            Action::Approve => "approve",
            Action::Manage => "manage",
        }
    }
}

/// Direct, additive permission override for one principal.
///
/// A grant without `resource_id` covers every resource of the type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub principal_id: String,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub action: Action,
}

impl PermissionGrant {
    pub fn covers(&self, request: &PermissionRequest) -> bool {
        self.resource_type == request.resource_type
            && self.action == request.action
            && match (&self.resource_id, &request.resource_id) {
                (None, _) => true,
                (Some(granted), Some(requested)) => granted == requested,
                (Some(_), None) => false,
            }
    }
}

/// The question asked of the RBAC engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub action: Action,
}

impl PermissionRequest {
    pub fn new(resource_type: ResourceType, resource_id: Option<&str>, action: Action) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.map(|s| s.to_string()),
            action,
        }
    }

    pub fn document(document_id: &str, action: Action) -> Self {
        Self::new(ResourceType::Document, Some(document_id), action)
    }
}
