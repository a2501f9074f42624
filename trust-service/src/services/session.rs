//! Session manager. Sessions are bound to the device fingerprint they were
//! opened from and live no longer than the configured maximum lifetime.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::audit::AuditGateway;
use super::clock::Clock;
use super::mfa::MfaService;
use super::rbac::permissions_for_role;
use super::store::{PrincipalStore, SessionStore};
use super::{Actor, ServiceError};
use crate::config::SessionConfig;
use crate::models::{AuditAction, NewSession, Session};

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    principals: Arc<dyn PrincipalStore>,
    mfa: MfaService,
    audit: AuditGateway,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        principals: Arc<dyn PrincipalStore>,
        mfa: MfaService,
        audit: AuditGateway,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions,
            principals,
            mfa,
            audit,
            clock,
            config,
        }
    }

    fn lifetime_cap(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + Duration::hours(self.config.max_lifetime_hours)
    }

    fn next_expiry(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        (now + Duration::minutes(self.config.ttl_minutes)).min(self.lifetime_cap(created_at))
    }

    /// Claims in `new` are re-checked: `mfa_verified` consumes the one-time
    /// proof issued to this principal and device by a verification inside
    /// the trust window, and `trusted_device` needs an unexpired
    /// trusted-device record for the fingerprint.
    pub async fn create_session(&self, new: NewSession) -> Result<Session, ServiceError> {
        let principal = self
            .principals
            .get_principal(&new.principal_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Principal"))?;
        if !principal.active {
            return Err(ServiceError::PrincipalInactive);
        }
        if new.device_fingerprint.trim().is_empty() {
            return Err(ServiceError::Validation(
                "device fingerprint is required".to_string(),
            ));
        }

        let role = match new.role {
            Some(requested) if requested != principal.role => {
                return Err(ServiceError::PermissionDenied(format!(
                    "role {} is not assigned",
                    requested
                )));
            }
            _ => principal.role,
        };

        let mfa_verified = match new.verification_id.as_deref().filter(|_| new.mfa_verified) {
            Some(proof) => {
                self.mfa
                    .redeem_proof(&principal.id, proof, &new.device_fingerprint)
                    .await?
            }
            None => false,
        };
        let trusted_device = new.trusted_device
            && self
                .mfa
                .is_trusted_device(&principal.id, &new.device_fingerprint)
                .await?;
        if !mfa_verified && !trusted_device {
            metrics::counter!("session_mfa_required_total").increment(1);
            return Err(ServiceError::MfaRequired);
        }

        let now = self.clock.now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            principal_id: principal.id.clone(),
            role,
            device_fingerprint: new.device_fingerprint,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            mfa_verified,
            trusted_device,
            permissions: permissions_for_role(role),
            created_at: now,
            expires_at: self.next_expiry(now, now),
        };
        self.sessions.insert_session(session.clone()).await?;

        tracing::info!(
            principal_id = %session.principal_id,
            session_id = %session.id,
            mfa_verified,
            trusted_device,
            "Session created"
        );
        self.audit
            .record(
                &session.principal_id,
                AuditAction::SessionCreated,
                format!(
                    "session_id={} mfa_verified={} trusted_device={}",
                    session.id, mfa_verified, trusted_device
                ),
                session.ip_address.clone(),
            )
            .await;
        Ok(session)
    }

    /// Fails closed on a different device fingerprint.
    pub async fn validate_session(
        &self,
        session_id: &str,
        device_fingerprint: &str,
    ) -> Result<Session, ServiceError> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(ServiceError::SessionNotFound)?;

        if session.is_expired(self.clock.now()) {
            self.sessions.remove_session(session_id).await?;
            return Err(ServiceError::SessionExpired);
        }

        let same_device: bool = session
            .device_fingerprint
            .as_bytes()
            .ct_eq(device_fingerprint.as_bytes())
            .into();
        if !same_device {
            metrics::counter!("session_device_mismatch_total").increment(1);
            tracing::warn!(
                principal_id = %session.principal_id,
                session_id = %session.id,
                "Session presented from a different device"
            );
            return Err(ServiceError::DeviceMismatch);
        }
        Ok(session)
    }

    /// Extends the session by one TTL, never past its maximum lifetime.
    pub async fn refresh_session(
        &self,
        session_id: &str,
        device_fingerprint: &str,
    ) -> Result<DateTime<Utc>, ServiceError> {
        let session = self.validate_session(session_id, device_fingerprint).await?;
        let now = self.clock.now();
        let expires_at = self.next_expiry(session.created_at, now);

        let refreshed = self
            .sessions
            .refresh_expiry(session_id, now, expires_at)
            .await?
            .ok_or(ServiceError::SessionExpired)?;

        self.audit
            .record(
                &refreshed.principal_id,
                AuditAction::SessionRefreshed,
                format!("session_id={} expires_at={}", session_id, expires_at.to_rfc3339()),
                refreshed.ip_address.clone(),
            )
            .await;
        Ok(refreshed.expires_at)
    }

    pub async fn destroy_session(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Result<(), ServiceError> {
        let session = self
            .sessions
            .remove_session(session_id)
            .await?
            .ok_or(ServiceError::SessionNotFound)?;

        tracing::info!(
            principal_id = %session.principal_id,
            session_id = %session_id,
            "Session destroyed"
        );
        self.audit
            .record(
                &actor.id,
                AuditAction::SessionDestroyed,
                format!("session_id={} principal_id={}", session_id, session.principal_id),
                actor.ip_address.clone(),
            )
            .await;
        Ok(())
    }

    /// Live sessions for one principal.
    pub async fn list_sessions(&self, principal_id: &str) -> Result<Vec<Session>, ServiceError> {
        let now = self.clock.now();
        Ok(self
            .sessions
            .sessions_for_principal(principal_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .collect())
    }

    pub async fn destroy_all_sessions(
        &self,
        actor: &Actor,
        principal_id: &str,
    ) -> Result<usize, ServiceError> {
        let ended = self
            .sessions
            .remove_sessions_for_principal(principal_id)
            .await?
            .len();
        if ended > 0 {
            self.audit
                .record(
                    &actor.id,
                    AuditAction::SessionDestroyed,
                    format!("principal_id={} sessions_ended={}", principal_id, ended),
                    actor.ip_address.clone(),
                )
                .await;
        }
        Ok(ended)
    }

    pub async fn sweep_expired(&self) -> Result<usize, ServiceError> {
        Ok(self
            .sessions
            .remove_expired_sessions(self.clock.now())
            .await?)
    }
}
