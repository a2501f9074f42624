//! Persistence gateway.
//!
//! Every aggregate sits behind its own narrow async trait so a transactional
//! backend can replace the in-memory one without touching business logic.
//! Operations that must be atomic (lock acquisition, version numbering, code
//! consumption, status transitions) are expressed as single store calls so the
//! backend owns the compare-and-set.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    AccessAction, Approval, AuditLogEntry, AuditQuery, BackupCodeOutcome, DlpScanResult,
    DocumentAccessEvent, DocumentLock, DocumentPolicy, DocumentVersion, EncryptedContent,
    MfaChallenge, MfaContact, MfaMethod, MfaProof, NewVersion, PermissionGrant, Principal, Role,
    Session, TotpEnrollment, TrustedDevice, VersionStatus,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn insert_principal(&self, principal: Principal) -> Result<(), StoreError>;
    async fn get_principal(&self, principal_id: &str) -> Result<Option<Principal>, StoreError>;
    async fn set_role(&self, principal_id: &str, role: Role)
        -> Result<Option<Principal>, StoreError>;
    async fn set_active(
        &self,
        principal_id: &str,
        active: bool,
    ) -> Result<Option<Principal>, StoreError>;
    async fn add_mfa_method(&self, principal_id: &str, method: MfaMethod)
        -> Result<(), StoreError>;
    async fn set_backup_codes_remaining(
        &self,
        principal_id: &str,
        remaining: u32,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MfaStore: Send + Sync {
    /// Confirmed secret only. A pending secret never answers here.
    async fn get_totp(&self, principal_id: &str) -> Result<Option<TotpEnrollment>, StoreError>;
    /// Accept `step` only if it is newer than every step already used.
    /// Returns false for a replay.
    async fn record_totp_step(&self, principal_id: &str, step: u64) -> Result<bool, StoreError>;
    /// Replaces any earlier pending secret; the confirmed one is untouched.
    async fn put_pending_totp(&self, enrollment: TotpEnrollment) -> Result<(), StoreError>;
    async fn get_pending_totp(
        &self,
        principal_id: &str,
    ) -> Result<Option<TotpEnrollment>, StoreError>;
    /// Promotes the pending secret if it still holds `secret`, recording
    /// `step` as used. False if it was replaced or already promoted.
    async fn confirm_pending_totp(
        &self,
        principal_id: &str,
        secret: &[u8],
        step: u64,
    ) -> Result<bool, StoreError>;

    /// Verified destination only.
    async fn get_contact(
        &self,
        principal_id: &str,
        method: MfaMethod,
    ) -> Result<Option<MfaContact>, StoreError>;
    /// Replaces any earlier pending destination; the verified one is untouched.
    async fn put_pending_contact(&self, contact: MfaContact) -> Result<(), StoreError>;
    async fn get_pending_contact(
        &self,
        principal_id: &str,
        method: MfaMethod,
    ) -> Result<Option<MfaContact>, StoreError>;
    /// Promotes the pending destination if it matches `destination`.
    async fn confirm_pending_contact(
        &self,
        principal_id: &str,
        method: MfaMethod,
        destination: &str,
    ) -> Result<bool, StoreError>;

    /// Replaces any outstanding challenge for the same principal and method.
    async fn put_challenge(&self, challenge: MfaChallenge) -> Result<(), StoreError>;
    async fn get_challenge(
        &self,
        principal_id: &str,
        method: MfaMethod,
    ) -> Result<Option<MfaChallenge>, StoreError>;
    /// Returns the attempt count after incrementing, or `u32::MAX` when the
    /// challenge no longer exists.
    async fn increment_challenge_attempts(&self, challenge_id: &str) -> Result<u32, StoreError>;
    /// Marks the challenge consumed. False if it was already consumed or is gone.
    async fn consume_challenge(&self, challenge_id: &str) -> Result<bool, StoreError>;
    async fn remove_expired_challenges(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn replace_backup_codes(
        &self,
        principal_id: &str,
        code_hashes: Vec<String>,
    ) -> Result<(), StoreError>;
    async fn consume_backup_code(
        &self,
        principal_id: &str,
        code_hash: &str,
    ) -> Result<BackupCodeOutcome, StoreError>;

    async fn record_verification(
        &self,
        principal_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn last_verification(
        &self,
        principal_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn put_proof(&self, proof: MfaProof) -> Result<(), StoreError>;
    /// Removes and returns the proof only when it belongs to `principal_id`,
    /// was issued to `device_fingerprint` and is unexpired at `now`.
    async fn take_proof(
        &self,
        proof_id: &str,
        principal_id: &str,
        device_fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MfaProof>, StoreError>;
    async fn remove_expired_proofs(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait TrustedDeviceStore: Send + Sync {
    /// Keyed by `(principal_id, fingerprint)`; re-trusting replaces the record.
    async fn upsert_device(&self, device: TrustedDevice) -> Result<(), StoreError>;
    async fn find_device(
        &self,
        principal_id: &str,
        fingerprint: &str,
    ) -> Result<Option<TrustedDevice>, StoreError>;
    async fn list_devices(&self, principal_id: &str) -> Result<Vec<TrustedDevice>, StoreError>;
    async fn remove_device(&self, principal_id: &str, device_id: &str)
        -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> Result<(), StoreError>;
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;
    async fn remove_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;
    /// Moves `expires_at` forward unless the session has already expired at `now`.
    async fn refresh_expiry(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;
    async fn sessions_for_principal(&self, principal_id: &str)
        -> Result<Vec<Session>, StoreError>;
    /// Removes every session of the principal in one pass.
    async fn remove_sessions_for_principal(
        &self,
        principal_id: &str,
    ) -> Result<Vec<Session>, StoreError>;
    /// Expiry is re-evaluated per entry at removal time.
    async fn remove_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// False if an identical grant already exists.
    async fn add_grant(&self, grant: PermissionGrant) -> Result<bool, StoreError>;
    async fn remove_grant(&self, grant: &PermissionGrant) -> Result<bool, StoreError>;
    async fn grants_for(&self, principal_id: &str) -> Result<Vec<PermissionGrant>, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockAcquisition {
    Acquired(DocumentLock),
    Renewed(DocumentLock),
    Held(DocumentLock),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockRelease {
    Released(DocumentLock),
    NotHolder(DocumentLock),
    NotLocked,
}

#[async_trait]
pub trait DocumentLockStore: Send + Sync {
    /// Compare-and-set: succeeds when the document is unlocked, the current
    /// lock has expired at `now`, or the current holder is the requester.
    async fn try_acquire(
        &self,
        lock: DocumentLock,
        now: DateTime<Utc>,
    ) -> Result<LockAcquisition, StoreError>;
    async fn release(
        &self,
        document_id: &str,
        holder_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LockRelease, StoreError>;
    async fn force_release(&self, document_id: &str) -> Result<Option<DocumentLock>, StoreError>;
    /// Current unexpired lock; an expired one is reclaimed on the way.
    async fn current_lock(
        &self,
        document_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DocumentLock>, StoreError>;
    async fn remove_expired_locks(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusTransition {
    Updated(DocumentVersion),
    Rejected(DocumentVersion),
    Missing,
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Assigns `version_number = max + 1` and links the previous latest version
    /// as parent, atomically per document.
    async fn insert_next(
        &self,
        document_id: &str,
        version: NewVersion,
    ) -> Result<DocumentVersion, StoreError>;
    async fn get_version(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError>;
    async fn get_content(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<Option<EncryptedContent>, StoreError>;
    async fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>, StoreError>;
    /// Moves the version to `to` only if its current status is in `from`.
    async fn transition_status(
        &self,
        document_id: &str,
        version_id: &str,
        from: &[VersionStatus],
        to: VersionStatus,
        approval: Option<Approval>,
    ) -> Result<StatusTransition, StoreError>;
}

#[async_trait]
pub trait AccessEventStore: Send + Sync {
    async fn append_event(&self, event: DocumentAccessEvent) -> Result<(), StoreError>;
    async fn count_events(
        &self,
        document_id: &str,
        principal_id: &str,
        action: AccessAction,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
    async fn events_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<DocumentAccessEvent>, StoreError>;
}

#[async_trait]
pub trait DlpStore: Send + Sync {
    /// Supersedes any previous result for the document.
    async fn put_scan(&self, result: DlpScanResult) -> Result<(), StoreError>;
    async fn get_scan(&self, document_id: &str) -> Result<Option<DlpScanResult>, StoreError>;
    async fn mark_reviewed(
        &self,
        document_id: &str,
        reviewer_id: &str,
    ) -> Result<Option<DlpScanResult>, StoreError>;
}

#[async_trait]
pub trait DocumentPolicyStore: Send + Sync {
    /// Replaces the document's policy.
    async fn put_policy(&self, document_id: &str, policy: DocumentPolicy)
        -> Result<(), StoreError>;
    async fn get_policy(&self, document_id: &str) -> Result<Option<DocumentPolicy>, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError>;
    /// Entries in append order.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, StoreError>;
}

/// The full set of storage backends the services are wired with.
#[derive(Clone)]
pub struct Backends {
    pub principals: Arc<dyn PrincipalStore>,
    pub mfa: Arc<dyn MfaStore>,
    pub devices: Arc<dyn TrustedDeviceStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub locks: Arc<dyn DocumentLockStore>,
    pub versions: Arc<dyn VersionStore>,
    pub access_events: Arc<dyn AccessEventStore>,
    pub dlp: Arc<dyn DlpStore>,
    pub policies: Arc<dyn DocumentPolicyStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Backends {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            principals: store.clone(),
            mfa: store.clone(),
            devices: store.clone(),
            sessions: store.clone(),
            permissions: store.clone(),
            locks: store.clone(),
            versions: store.clone(),
            access_events: store.clone(),
            dlp: store.clone(),
            policies: store.clone(),
            audit: store,
        }
    }
}
