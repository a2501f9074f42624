//! Document version history, single-writer locks and the approval workflow.
//!
//! A version can only be created by the principal holding the document's
//! lock. Numbering is assigned by the store, so concurrent creators never
//! share a number.

use chrono::Duration;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::audit::AuditGateway;
use super::clock::Clock;
use super::document_security::DocumentSecurityService;
use super::store::{
    DocumentLockStore, LockAcquisition, LockRelease, StatusTransition, VersionStore,
};
use super::{Actor, ServiceError};
use crate::models::{
    AccessContext, Approval, AuditAction, DocumentLock, DocumentVersion, LockType, NewVersion,
    VersionStatus,
};

const MAX_LOCK_TTL_HOURS: i64 = 24;

/// Caller-supplied content and metadata for a new version.
#[derive(Debug, Clone)]
pub struct VersionDraft {
    pub title: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Clone)]
pub struct VersionService {
    locks: Arc<dyn DocumentLockStore>,
    versions: Arc<dyn VersionStore>,
    security: DocumentSecurityService,
    audit: AuditGateway,
    clock: Arc<dyn Clock>,
    default_lock_ttl: Duration,
}

impl VersionService {
    pub fn new(
        locks: Arc<dyn DocumentLockStore>,
        versions: Arc<dyn VersionStore>,
        security: DocumentSecurityService,
        audit: AuditGateway,
        clock: Arc<dyn Clock>,
        default_lock_ttl: Duration,
    ) -> Self {
        Self {
            locks,
            versions,
            security,
            audit,
            clock,
            default_lock_ttl,
        }
    }

    /// Acquires or renews the document lock. Another holder's live lock is
    /// reported with its holder and expiry.
    pub async fn acquire_lock(
        &self,
        actor: &Actor,
        document_id: &str,
        lock_type: LockType,
        ttl: Option<Duration>,
        reason: Option<String>,
    ) -> Result<DocumentLock, ServiceError> {
        let ttl = ttl.unwrap_or(self.default_lock_ttl);
        if ttl <= Duration::zero() || ttl > Duration::hours(MAX_LOCK_TTL_HOURS) {
            return Err(ServiceError::Validation(format!(
                "lock ttl must be between 1 second and {} hours",
                MAX_LOCK_TTL_HOURS
            )));
        }

        let now = self.clock.now();
        let candidate = DocumentLock {
            document_id: document_id.to_string(),
            holder_id: actor.id.clone(),
            lock_type,
            reason,
            acquired_at: now,
            expires_at: now + ttl,
        };

        let (lock, renewed) = match self.locks.try_acquire(candidate, now).await? {
            LockAcquisition::Acquired(lock) => (lock, false),
            LockAcquisition::Renewed(lock) => (lock, true),
            LockAcquisition::Held(current) => {
                metrics::counter!("lock_conflicts_total").increment(1);
                tracing::info!(
                    document_id = %document_id,
                    principal_id = %actor.id,
                    holder_id = %current.holder_id,
                    "Lock conflict"
                );
                return Err(ServiceError::AlreadyLocked {
                    holder: current.holder_id,
                    expires_at: current.expires_at,
                });
            }
        };

        tracing::info!(
            document_id = %document_id,
            principal_id = %actor.id,
            renewed,
            "Document locked"
        );
        self.audit
            .record(
                &actor.id,
                AuditAction::DocumentLocked,
                format!(
                    "document_id={} lock_type={:?} renewed={} expires_at={}",
                    document_id,
                    lock.lock_type,
                    renewed,
                    lock.expires_at.to_rfc3339()
                ),
                actor.ip_address.clone(),
            )
            .await;
        Ok(lock)
    }

    pub async fn release_lock(&self, actor: &Actor, document_id: &str) -> Result<(), ServiceError> {
        let now = self.clock.now();
        match self.locks.release(document_id, &actor.id, now).await? {
            LockRelease::Released(_) => {
                tracing::info!(document_id = %document_id, principal_id = %actor.id, "Document unlocked");
                self.audit
                    .record(
                        &actor.id,
                        AuditAction::DocumentUnlocked,
                        format!("document_id={}", document_id),
                        actor.ip_address.clone(),
                    )
                    .await;
                Ok(())
            }
            LockRelease::NotHolder(_) | LockRelease::NotLocked => Err(ServiceError::LockNotHeld),
        }
    }

    /// Administrative override; removes whoever holds the lock.
    pub async fn force_release_lock(
        &self,
        actor: &Actor,
        document_id: &str,
    ) -> Result<DocumentLock, ServiceError> {
        let lock = self
            .locks
            .force_release(document_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Lock"))?;

        tracing::warn!(
            document_id = %document_id,
            principal_id = %actor.id,
            holder_id = %lock.holder_id,
            "Document lock overridden"
        );
        self.audit
            .record(
                &actor.id,
                AuditAction::DocumentLockOverridden,
                format!("document_id={} holder_id={}", document_id, lock.holder_id),
                actor.ip_address.clone(),
            )
            .await;
        Ok(lock)
    }

    pub async fn get_lock(&self, document_id: &str) -> Result<Option<DocumentLock>, ServiceError> {
        Ok(self
            .locks
            .current_lock(document_id, self.clock.now())
            .await?)
    }

    pub async fn create_version(
        &self,
        actor: &Actor,
        document_id: &str,
        draft: VersionDraft,
    ) -> Result<DocumentVersion, ServiceError> {
        if draft.title.trim().is_empty() {
            return Err(ServiceError::Validation("title is required".to_string()));
        }

        let now = self.clock.now();
        match self.locks.current_lock(document_id, now).await? {
            Some(lock) if lock.holder_id == actor.id => {}
            Some(lock) => {
                return Err(ServiceError::AlreadyLocked {
                    holder: lock.holder_id,
                    expires_at: lock.expires_at,
                })
            }
            None => return Err(ServiceError::LockRequired),
        }

        let content_sha256 = hex::encode(Sha256::digest(&draft.content));
        let sealed = self.security.encrypt(document_id, &draft.content)?;
        let version = self
            .versions
            .insert_next(
                document_id,
                NewVersion {
                    title: draft.title,
                    content_type: draft.content_type,
                    content_sha256,
                    size_bytes: draft.content.len() as u64,
                    created_by: actor.id.clone(),
                    content: sealed,
                    created_at: now,
                },
            )
            .await?;

        tracing::info!(
            document_id = %document_id,
            version_id = %version.id,
            version_number = version.version_number,
            "Version created"
        );
        self.audit
            .record(
                &actor.id,
                AuditAction::VersionCreated,
                format!(
                    "document_id={} version_id={} version_number={}",
                    document_id, version.id, version.version_number
                ),
                actor.ip_address.clone(),
            )
            .await;
        Ok(version)
    }

    pub async fn list_versions(
        &self,
        document_id: &str,
    ) -> Result<Vec<DocumentVersion>, ServiceError> {
        Ok(self.versions.list_versions(document_id).await?)
    }

    pub async fn get_version(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<DocumentVersion, ServiceError> {
        self.versions
            .get_version(document_id, version_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Version"))
    }

    /// Decrypted content; the read is logged as a `view`.
    pub async fn version_content(
        &self,
        ctx: &AccessContext,
        document_id: &str,
        version_id: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        let sealed = self
            .versions
            .get_content(document_id, version_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Version"))?;
        self.security.decrypt(document_id, &sealed, ctx).await
    }

    pub async fn submit_for_review(
        &self,
        actor: &Actor,
        document_id: &str,
        version_id: &str,
    ) -> Result<DocumentVersion, ServiceError> {
        let version = match self
            .versions
            .transition_status(
                document_id,
                version_id,
                &[VersionStatus::Draft],
                VersionStatus::Pending,
                None,
            )
            .await?
        {
            StatusTransition::Updated(version) => version,
            StatusTransition::Rejected(current) => {
                return Err(if current.status == VersionStatus::Approved {
                    ServiceError::AlreadyApproved
                } else {
                    ServiceError::InvalidTransition
                })
            }
            StatusTransition::Missing => return Err(ServiceError::not_found("Version")),
        };

        self.audit
            .record(
                &actor.id,
                AuditAction::VersionSubmitted,
                format!("document_id={} version_id={}", document_id, version_id),
                actor.ip_address.clone(),
            )
            .await;
        Ok(version)
    }

    /// One-way: an approved version never changes status again.
    pub async fn approve_version(
        &self,
        actor: &Actor,
        document_id: &str,
        version_id: &str,
        comments: Option<String>,
    ) -> Result<DocumentVersion, ServiceError> {
        let approval = Approval {
            approver_id: actor.id.clone(),
            comments,
            approved_at: self.clock.now(),
        };
        let version = match self
            .versions
            .transition_status(
                document_id,
                version_id,
                &[VersionStatus::Draft, VersionStatus::Pending],
                VersionStatus::Approved,
                Some(approval),
            )
            .await?
        {
            StatusTransition::Updated(version) => version,
            StatusTransition::Rejected(_) => return Err(ServiceError::AlreadyApproved),
            StatusTransition::Missing => return Err(ServiceError::not_found("Version")),
        };

        tracing::info!(
            document_id = %document_id,
            version_id = %version_id,
            approver_id = %actor.id,
            "Version approved"
        );
        self.audit
            .record(
                &actor.id,
                AuditAction::VersionApproved,
                format!(
                    "document_id={} version_id={} version_number={}",
                    document_id, version_id, version.version_number
                ),
                actor.ip_address.clone(),
            )
            .await;
        Ok(version)
    }

    pub async fn sweep_locks(&self) -> Result<usize, ServiceError> {
        Ok(self.locks.remove_expired_locks(self.clock.now()).await?)
    }
}
