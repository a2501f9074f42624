//! RBAC engine.
//!
//! A check is a pure function of the principal's role, the static role table
//! and the principal's direct grants. Checks never write anything; callers
//! audit denials where they matter.

use std::sync::Arc;
use validator::ValidateEmail;

use super::audit::AuditGateway;
use super::clock::Clock;
use super::store::{PermissionStore, PrincipalStore, SessionStore};
use super::{Actor, ServiceError};
use crate::models::{
    Action, AuditAction, NewPrincipal, PermissionGrant, PermissionRequest, Principal,
    ResourceType, Role,
};

/// Actions a role holds on one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleScope {
    All,
    Only(&'static [Action]),
}

impl RoleScope {
    fn allows(&self, action: Action) -> bool {
        match self {
            RoleScope::All => true,
            RoleScope::Only(actions) => actions.contains(&action),
        }
    }
}

/// Static role table.
pub fn role_scopes(role: Role) -> &'static [(ResourceType, RoleScope)] {
    use Action::*;
    use ResourceType::*;
    use RoleScope::*;

    match role {
        Role::Admin => &[
            (Document, All),
            (DataRoom, All),
            (Ddq, All),
            (Principal, All),
            (AuditLog, All),
        ],
        Role::Manager => &[
            (Document, All),
            (DataRoom, All),
            (Ddq, All),
            (Principal, Only(&[View])),
            (AuditLog, Only(&[View])),
        ],
        Role::Analyst => &[
            (Document, Only(&[View, Download, Print, Share, Edit, Create])),
            (DataRoom, Only(&[View])),
            (Ddq, Only(&[View, Edit, Create])),
        ],
        Role::Reviewer => &[
            (Document, Only(&[View, Download, Approve])),
            (DataRoom, Only(&[View])),
            (Ddq, Only(&[View, Approve])),
            (AuditLog, Only(&[View])),
        ],
        Role::Viewer => &[
            (Document, Only(&[View, Download])),
            (DataRoom, Only(&[View])),
            (Ddq, Only(&[View])),
        ],
        Role::Guest => &[(Document, Only(&[View]))],
    }
}

pub fn role_allows(role: Role, resource_type: ResourceType, action: Action) -> bool {
    role_scopes(role)
        .iter()
        .any(|(rt, scope)| *rt == resource_type && scope.allows(action))
}

/// `resource:action` strings for a role, with `*` for a whole resource type.
pub fn permissions_for_role(role: Role) -> Vec<String> {
    role_scopes(role)
        .iter()
        .flat_map(|(rt, scope)| match scope {
            RoleScope::All => vec![format!("{}:*", rt.as_str())],
            RoleScope::Only(actions) => actions
                .iter()
                .map(|a| format!("{}:{}", rt.as_str(), a.as_str()))
                .collect(),
        })
        .collect()
}

fn describe(request: &PermissionRequest) -> String {
    match &request.resource_id {
        Some(id) => format!(
            "{}:{} on {}",
            request.resource_type.as_str(),
            request.action.as_str(),
            id
        ),
        None => format!(
            "{}:{}",
            request.resource_type.as_str(),
            request.action.as_str()
        ),
    }
}

#[derive(Clone)]
pub struct RbacService {
    principals: Arc<dyn PrincipalStore>,
    grants: Arc<dyn PermissionStore>,
    sessions: Arc<dyn SessionStore>,
    audit: AuditGateway,
    clock: Arc<dyn Clock>,
}

impl RbacService {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        grants: Arc<dyn PermissionStore>,
        sessions: Arc<dyn SessionStore>,
        audit: AuditGateway,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            principals,
            grants,
            sessions,
            audit,
            clock,
        }
    }

    pub async fn register_principal(
        &self,
        actor: &Actor,
        new: NewPrincipal,
    ) -> Result<Principal, ServiceError> {
        if !new.email.validate_email() {
            return Err(ServiceError::InvalidEmailFormat);
        }
        if new.display_name.trim().is_empty() {
            return Err(ServiceError::Validation(
                "display name is required".to_string(),
            ));
        }
        let principal = Principal::new(new, self.clock.now());
        self.principals
            .insert_principal(principal.clone())
            .await
            .map_err(|e| match e {
                super::store::StoreError::Duplicate(_) => {
                    ServiceError::AlreadyExists("Principal".to_string())
                }
                other => other.into(),
            })?;

        tracing::info!(principal_id = %principal.id, role = %principal.role, "Principal registered");
        self.audit
            .record(
                &actor.id,
                AuditAction::PrincipalRegistered,
                format!("principal_id={} role={}", principal.id, principal.role),
                actor.ip_address.clone(),
            )
            .await;
        Ok(principal)
    }

    pub async fn get_principal(&self, principal_id: &str) -> Result<Principal, ServiceError> {
        self.principals
            .get_principal(principal_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Principal"))
    }

    /// Always produces exactly one audit entry on success.
    pub async fn assign_role(
        &self,
        actor: &Actor,
        principal_id: &str,
        role: Role,
    ) -> Result<Principal, ServiceError> {
        let previous = self.get_principal(principal_id).await?.role;
        let principal = self
            .principals
            .set_role(principal_id, role)
            .await?
            .ok_or_else(|| ServiceError::not_found("Principal"))?;

        tracing::info!(
            actor_id = %actor.id,
            principal_id = %principal_id,
            from = %previous,
            to = %role,
            "Role assigned"
        );
        self.audit
            .record(
                &actor.id,
                AuditAction::RoleAssigned,
                format!("principal_id={} from={} to={}", principal_id, previous, role),
                actor.ip_address.clone(),
            )
            .await;
        Ok(principal)
    }

    /// Denies every later check and ends the principal's sessions.
    pub async fn deactivate_principal(
        &self,
        actor: &Actor,
        principal_id: &str,
    ) -> Result<Principal, ServiceError> {
        let principal = self
            .principals
            .set_active(principal_id, false)
            .await?
            .ok_or_else(|| ServiceError::not_found("Principal"))?;

        let ended = self
            .sessions
            .remove_sessions_for_principal(principal_id)
            .await?
            .len();

        tracing::info!(principal_id = %principal_id, sessions_ended = ended, "Principal deactivated");
        self.audit
            .record(
                &actor.id,
                AuditAction::PrincipalDeactivated,
                format!("principal_id={} sessions_ended={}", principal_id, ended),
                actor.ip_address.clone(),
            )
            .await;
        Ok(principal)
    }

    pub async fn grant_permission(
        &self,
        actor: &Actor,
        grant: PermissionGrant,
    ) -> Result<bool, ServiceError> {
        self.get_principal(&grant.principal_id).await?;
        let added = self.grants.add_grant(grant.clone()).await?;
        if added {
            self.audit
                .record(
                    &actor.id,
                    AuditAction::PermissionGranted,
                    format!(
                        "principal_id={} permission={}",
                        grant.principal_id,
                        describe(&PermissionRequest::new(
                            grant.resource_type,
                            grant.resource_id.as_deref(),
                            grant.action
                        ))
                    ),
                    actor.ip_address.clone(),
                )
                .await;
        }
        Ok(added)
    }

    pub async fn revoke_permission(
        &self,
        actor: &Actor,
        grant: &PermissionGrant,
    ) -> Result<(), ServiceError> {
        if !self.grants.remove_grant(grant).await? {
            return Err(ServiceError::not_found("Permission grant"));
        }
        self.audit
            .record(
                &actor.id,
                AuditAction::PermissionRevoked,
                format!(
                    "principal_id={} resource={} action={}",
                    grant.principal_id,
                    grant.resource_type.as_str(),
                    grant.action.as_str()
                ),
                actor.ip_address.clone(),
            )
            .await;
        Ok(())
    }

    /// Default deny. Unknown and deactivated principals hold nothing.
    pub async fn has_permission(
        &self,
        principal_id: &str,
        request: &PermissionRequest,
    ) -> Result<bool, ServiceError> {
        let Some(principal) = self.principals.get_principal(principal_id).await? else {
            return Ok(false);
        };
        if !principal.active {
            return Ok(false);
        }
        if role_allows(principal.role, request.resource_type, request.action) {
            return Ok(true);
        }
        Ok(self
            .grants
            .grants_for(principal_id)
            .await?
            .iter()
            .any(|g| g.covers(request)))
    }

    /// Like [`has_permission`](Self::has_permission) but fails with the
    /// specific authorization error.
    pub async fn require(
        &self,
        principal_id: &str,
        request: &PermissionRequest,
    ) -> Result<(), ServiceError> {
        if self.has_permission(principal_id, request).await? {
            return Ok(());
        }
        let inactive = self
            .principals
            .get_principal(principal_id)
            .await?
            .is_some_and(|p| !p.active);
        if inactive {
            return Err(ServiceError::PrincipalInactive);
        }
        metrics::counter!(
            "permission_denials_total",
            "resource" => request.resource_type.as_str(),
            "action" => request.action.as_str()
        )
        .increment(1);
        Err(ServiceError::PermissionDenied(describe(request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditQuery;
    use crate::services::clock::SystemClock;
    use crate::services::store::Backends;

    async fn service() -> (RbacService, AuditGateway) {
        let backends = Backends::in_memory();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let audit = AuditGateway::new(
            backends.audit.clone(),
            clock.clone(),
            std::time::Duration::from_millis(100),
        );
        let rbac = RbacService::new(
            backends.principals,
            backends.permissions,
            backends.sessions,
            audit.clone(),
            clock,
        );
        for (id, role) in [("user-x", Role::Viewer), ("user-g", Role::Guest)] {
            rbac.register_principal(
                &Actor::new("admin-1"),
                NewPrincipal {
                    id: Some(id.to_string()),
                    email: format!("{}@example.com", id),
                    display_name: id.to_string(),
                    role,
                },
            )
            .await
            .unwrap();
        }
        (rbac, audit)
    }

    #[test]
    fn test_role_table() {
        assert!(role_allows(Role::Admin, ResourceType::AuditLog, Action::Manage));
        assert!(role_allows(Role::Reviewer, ResourceType::Document, Action::Approve));
        assert!(!role_allows(Role::Viewer, ResourceType::Document, Action::Edit));
        assert!(!role_allows(Role::Guest, ResourceType::Document, Action::Download));
        assert_eq!(permissions_for_role(Role::Guest), vec!["document:view"]);
        assert!(permissions_for_role(Role::Admin).contains(&"document:*".to_string()));
    }

    #[tokio::test]
    async fn test_direct_grant_is_scoped_to_resource() {
        let (rbac, _) = service().await;
        let grant = PermissionGrant {
            principal_id: "user-g".to_string(),
            resource_type: ResourceType::Document,
            resource_id: Some("doc-1".to_string()),
            action: Action::Download,
        };
        assert!(rbac.grant_permission(&Actor::new("admin-1"), grant).await.unwrap());

        let doc1 = PermissionRequest::document("doc-1", Action::Download);
        let doc2 = PermissionRequest::document("doc-2", Action::Download);
        assert!(rbac.has_permission("user-g", &doc1).await.unwrap());
        assert!(!rbac.has_permission("user-g", &doc2).await.unwrap());
        assert!(!rbac.has_permission("nobody", &doc1).await.unwrap());
    }

    #[tokio::test]
    async fn test_assign_role_audits_once() {
        let (rbac, audit) = service().await;
        rbac.assign_role(&Actor::new("admin-1"), "user-x", Role::Admin)
            .await
            .unwrap();

        let entries = audit
            .query(&AuditQuery {
                action: Some(AuditAction::RoleAssigned),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].details.contains("to=admin"));
    }

    #[tokio::test]
    async fn test_deactivated_principal_is_denied() {
        let (rbac, _) = service().await;
        let request = PermissionRequest::document("doc-1", Action::View);
        assert!(rbac.has_permission("user-x", &request).await.unwrap());

        rbac.deactivate_principal(&Actor::new("admin-1"), "user-x")
            .await
            .unwrap();
        assert!(!rbac.has_permission("user-x", &request).await.unwrap());
        assert!(matches!(
            rbac.require("user-x", &request).await,
            Err(ServiceError::PrincipalInactive)
        ));
    }
}
