use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    AccessEventStore, AuditStore, DlpStore, DocumentLockStore, DocumentPolicyStore,
    LockAcquisition, LockRelease, MfaStore, PermissionStore, PrincipalStore, SessionStore,
    StatusTransition, StoreError, TrustedDeviceStore, VersionStore,
};
use crate::models::{
    AccessAction, Approval, AuditLogEntry, AuditQuery, BackupCodeOutcome, DlpScanResult,
    DocumentAccessEvent, DocumentLock, DocumentPolicy, DocumentVersion, EncryptedContent,
    MfaChallenge, MfaContact, MfaMethod, MfaProof, NewVersion, PermissionGrant, Principal, Role,
    Session, TotpEnrollment, TrustedDevice, VersionStatus,
};

struct StoredVersion {
    version: DocumentVersion,
    content: EncryptedContent,
}

/// Process-local backend. Per-key atomicity comes from DashMap entry locks;
/// the append-only ledgers sit behind a mutex.
#[derive(Default)]
pub struct InMemoryStore {
    principals: DashMap<String, Principal>,
    totp: DashMap<String, TotpEnrollment>,
    pending_totp: DashMap<String, TotpEnrollment>,
    contacts: DashMap<(String, MfaMethod), MfaContact>,
    pending_contacts: DashMap<(String, MfaMethod), MfaContact>,
    challenges: DashMap<String, MfaChallenge>,
    backup_codes: DashMap<String, Vec<String>>,
    verifications: DashMap<String, DateTime<Utc>>,
    proofs: DashMap<String, MfaProof>,
    devices: DashMap<(String, String), TrustedDevice>,
    sessions: DashMap<String, Session>,
    grants: DashMap<String, Vec<PermissionGrant>>,
    locks: DashMap<String, DocumentLock>,
    versions: DashMap<String, Vec<StoredVersion>>,
    access_events: Mutex<Vec<DocumentAccessEvent>>,
    scans: DashMap<String, DlpScanResult>,
    policies: DashMap<String, DocumentPolicy>,
    audit_log: Mutex<Vec<AuditLogEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{} mutex poisoned", what))
}

#[async_trait]
impl PrincipalStore for InMemoryStore {
    async fn insert_principal(&self, principal: Principal) -> Result<(), StoreError> {
        match self.principals.entry(principal.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("principal {}", principal.id))),
            Entry::Vacant(slot) => {
                slot.insert(principal);
                Ok(())
            }
        }
    }

    async fn get_principal(&self, principal_id: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self.principals.get(principal_id).map(|p| p.clone()))
    }

    async fn set_role(
        &self,
        principal_id: &str,
        role: Role,
    ) -> Result<Option<Principal>, StoreError> {
        Ok(self.principals.get_mut(principal_id).map(|mut p| {
            p.role = role;
            p.clone()
        }))
    }

    async fn set_active(
        &self,
        principal_id: &str,
        active: bool,
    ) -> Result<Option<Principal>, StoreError> {
        Ok(self.principals.get_mut(principal_id).map(|mut p| {
            p.active = active;
            p.clone()
        }))
    }

    async fn add_mfa_method(
        &self,
        principal_id: &str,
        method: MfaMethod,
    ) -> Result<(), StoreError> {
        if let Some(mut p) = self.principals.get_mut(principal_id) {
            if !p.mfa_enrolled_methods.contains(&method) {
                p.mfa_enrolled_methods.push(method);
            }
        }
        Ok(())
    }

    async fn set_backup_codes_remaining(
        &self,
        principal_id: &str,
        remaining: u32,
    ) -> Result<(), StoreError> {
        if let Some(mut p) = self.principals.get_mut(principal_id) {
            p.backup_codes_remaining = remaining;
        }
        Ok(())
    }
}

#[async_trait]
impl MfaStore for InMemoryStore {
    async fn get_totp(&self, principal_id: &str) -> Result<Option<TotpEnrollment>, StoreError> {
        Ok(self.totp.get(principal_id).map(|e| e.clone()))
    }

    async fn record_totp_step(&self, principal_id: &str, step: u64) -> Result<bool, StoreError> {
        let Some(mut enrollment) = self.totp.get_mut(principal_id) else {
            return Ok(false);
        };
        if enrollment.last_used_step.is_some_and(|last| step <= last) {
            return Ok(false);
        }
        enrollment.last_used_step = Some(step);
        Ok(true)
    }

    async fn put_pending_totp(&self, enrollment: TotpEnrollment) -> Result<(), StoreError> {
        self.pending_totp
            .insert(enrollment.principal_id.clone(), enrollment);
        Ok(())
    }

    async fn get_pending_totp(
        &self,
        principal_id: &str,
    ) -> Result<Option<TotpEnrollment>, StoreError> {
        Ok(self.pending_totp.get(principal_id).map(|e| e.clone()))
    }

    async fn confirm_pending_totp(
        &self,
        principal_id: &str,
        secret: &[u8],
        step: u64,
    ) -> Result<bool, StoreError> {
        let Some((_, mut enrollment)) = self
            .pending_totp
            .remove_if(principal_id, |_, e| e.secret == secret)
        else {
            return Ok(false);
        };
        enrollment.confirmed = true;
        enrollment.last_used_step = Some(step);
        self.totp.insert(principal_id.to_string(), enrollment);
        Ok(true)
    }

    async fn get_contact(
        &self,
        principal_id: &str,
        method: MfaMethod,
    ) -> Result<Option<MfaContact>, StoreError> {
        Ok(self
            .contacts
            .get(&(principal_id.to_string(), method))
            .map(|c| c.clone()))
    }

    async fn put_pending_contact(&self, contact: MfaContact) -> Result<(), StoreError> {
        self.pending_contacts
            .insert((contact.principal_id.clone(), contact.method), contact);
        Ok(())
    }

    async fn get_pending_contact(
        &self,
        principal_id: &str,
        method: MfaMethod,
    ) -> Result<Option<MfaContact>, StoreError> {
        Ok(self
            .pending_contacts
            .get(&(principal_id.to_string(), method))
            .map(|c| c.clone()))
    }

    async fn confirm_pending_contact(
        &self,
        principal_id: &str,
        method: MfaMethod,
        destination: &str,
    ) -> Result<bool, StoreError> {
        let key = (principal_id.to_string(), method);
        let Some((key, mut contact)) = self
            .pending_contacts
            .remove_if(&key, |_, c| c.destination == destination)
        else {
            return Ok(false);
        };
        contact.verified = true;
        self.contacts.insert(key, contact);
        Ok(true)
    }

    async fn put_challenge(&self, challenge: MfaChallenge) -> Result<(), StoreError> {
        self.challenges.retain(|_, c| {
            !(c.principal_id == challenge.principal_id && c.method == challenge.method)
        });
        self.challenges.insert(challenge.id.clone(), challenge);
        Ok(())
    }

    async fn get_challenge(
        &self,
        principal_id: &str,
        method: MfaMethod,
    ) -> Result<Option<MfaChallenge>, StoreError> {
        Ok(self
            .challenges
            .iter()
            .filter(|c| c.principal_id == principal_id && c.method == method)
            .max_by_key(|c| c.created_at)
            .map(|c| c.clone()))
    }

    async fn increment_challenge_attempts(&self, challenge_id: &str) -> Result<u32, StoreError> {
        Ok(self
            .challenges
            .get_mut(challenge_id)
            .map(|mut c| {
                c.attempts += 1;
                c.attempts
            })
            .unwrap_or(u32::MAX))
    }

    async fn consume_challenge(&self, challenge_id: &str) -> Result<bool, StoreError> {
        let Some(mut challenge) = self.challenges.get_mut(challenge_id) else {
            return Ok(false);
        };
        if challenge.consumed {
            return Ok(false);
        }
        challenge.consumed = true;
        Ok(true)
    }

    async fn remove_expired_challenges(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.challenges.len();
        self.challenges
            .retain(|_, c| !(c.is_expired(now) || c.consumed));
        Ok(before.saturating_sub(self.challenges.len()))
    }

    async fn replace_backup_codes(
        &self,
        principal_id: &str,
        code_hashes: Vec<String>,
    ) -> Result<(), StoreError> {
        self.backup_codes
            .insert(principal_id.to_string(), code_hashes);
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        principal_id: &str,
        code_hash: &str,
    ) -> Result<BackupCodeOutcome, StoreError> {
        let Some(mut codes) = self.backup_codes.get_mut(principal_id) else {
            return Ok(BackupCodeOutcome::NotGenerated);
        };
        match codes.iter().position(|h| h == code_hash) {
            Some(index) => {
                codes.swap_remove(index);
                Ok(BackupCodeOutcome::Consumed {
                    remaining: codes.len() as u32,
                })
            }
            None => Ok(BackupCodeOutcome::NoMatch {
                remaining: codes.len() as u32,
            }),
        }
    }

    async fn record_verification(
        &self,
        principal_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.verifications.insert(principal_id.to_string(), at);
        Ok(())
    }

    async fn last_verification(
        &self,
        principal_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.verifications.get(principal_id).map(|t| *t))
    }

    async fn put_proof(&self, proof: MfaProof) -> Result<(), StoreError> {
        self.proofs.insert(proof.id.clone(), proof);
        Ok(())
    }

    async fn take_proof(
        &self,
        proof_id: &str,
        principal_id: &str,
        device_fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MfaProof>, StoreError> {
        Ok(self
            .proofs
            .remove_if(proof_id, |_, p| {
                p.principal_id == principal_id
                    && p.device_fingerprint == device_fingerprint
                    && !p.is_expired(now)
            })
            .map(|(_, p)| p))
    }

    async fn remove_expired_proofs(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.proofs.len();
        self.proofs.retain(|_, p| !p.is_expired(now));
        Ok(before.saturating_sub(self.proofs.len()))
    }
}

#[async_trait]
impl TrustedDeviceStore for InMemoryStore {
    async fn upsert_device(&self, device: TrustedDevice) -> Result<(), StoreError> {
        self.devices.insert(
            (device.principal_id.clone(), device.fingerprint.clone()),
            device,
        );
        Ok(())
    }

    async fn find_device(
        &self,
        principal_id: &str,
        fingerprint: &str,
    ) -> Result<Option<TrustedDevice>, StoreError> {
        Ok(self
            .devices
            .get(&(principal_id.to_string(), fingerprint.to_string()))
            .map(|d| d.clone()))
    }

    async fn list_devices(&self, principal_id: &str) -> Result<Vec<TrustedDevice>, StoreError> {
        let mut devices: Vec<TrustedDevice> = self
            .devices
            .iter()
            .filter(|d| d.principal_id == principal_id)
            .map(|d| d.clone())
            .collect();
        devices.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(devices)
    }

    async fn remove_device(
        &self,
        principal_id: &str,
        device_id: &str,
    ) -> Result<bool, StoreError> {
        let before = self.devices.len();
        self.devices
            .retain(|_, d| !(d.principal_id == principal_id && d.id == device_id));
        Ok(self.devices.len() < before)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn remove_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.remove(session_id).map(|(_, s)| s))
    }

    async fn refresh_expiry(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if session.is_expired(now) {
            return Ok(None);
        }
        session.expires_at = expires_at;
        Ok(Some(session.clone()))
    }

    async fn sessions_for_principal(
        &self,
        principal_id: &str,
    ) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.principal_id == principal_id)
            .map(|s| s.clone())
            .collect())
    }

    async fn remove_sessions_for_principal(
        &self,
        principal_id: &str,
    ) -> Result<Vec<Session>, StoreError> {
        let mut removed = Vec::new();
        self.sessions.retain(|_, s| {
            if s.principal_id == principal_id {
                removed.push(s.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn remove_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn add_grant(&self, grant: PermissionGrant) -> Result<bool, StoreError> {
        let mut grants = self.grants.entry(grant.principal_id.clone()).or_default();
        if grants.contains(&grant) {
            return Ok(false);
        }
        grants.push(grant);
        Ok(true)
    }

    async fn remove_grant(&self, grant: &PermissionGrant) -> Result<bool, StoreError> {
        let Some(mut grants) = self.grants.get_mut(&grant.principal_id) else {
            return Ok(false);
        };
        let before = grants.len();
        grants.retain(|g| g != grant);
        Ok(grants.len() < before)
    }

    async fn grants_for(&self, principal_id: &str) -> Result<Vec<PermissionGrant>, StoreError> {
        Ok(self
            .grants
            .get(principal_id)
            .map(|g| g.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DocumentLockStore for InMemoryStore {
    async fn try_acquire(
        &self,
        lock: DocumentLock,
        now: DateTime<Utc>,
    ) -> Result<LockAcquisition, StoreError> {
        match self.locks.entry(lock.document_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(lock.clone());
                Ok(LockAcquisition::Acquired(lock))
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if current.is_expired(now) {
                    slot.insert(lock.clone());
                    Ok(LockAcquisition::Acquired(lock))
                } else if current.holder_id == lock.holder_id {
                    let renewed = DocumentLock {
                        acquired_at: current.acquired_at,
                        ..lock
                    };
                    slot.insert(renewed.clone());
                    Ok(LockAcquisition::Renewed(renewed))
                } else {
                    Ok(LockAcquisition::Held(current.clone()))
                }
            }
        }
    }

    async fn release(
        &self,
        document_id: &str,
        holder_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LockRelease, StoreError> {
        match self.locks.entry(document_id.to_string()) {
            Entry::Vacant(_) => Ok(LockRelease::NotLocked),
            Entry::Occupied(slot) => {
                if slot.get().is_expired(now) {
                    slot.remove();
                    Ok(LockRelease::NotLocked)
                } else if slot.get().holder_id == holder_id {
                    Ok(LockRelease::Released(slot.remove()))
                } else {
                    Ok(LockRelease::NotHolder(slot.get().clone()))
                }
            }
        }
    }

    async fn force_release(&self, document_id: &str) -> Result<Option<DocumentLock>, StoreError> {
        Ok(self.locks.remove(document_id).map(|(_, l)| l))
    }

    async fn current_lock(
        &self,
        document_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DocumentLock>, StoreError> {
        self.locks.remove_if(document_id, |_, l| l.is_expired(now));
        Ok(self.locks.get(document_id).map(|l| l.clone()))
    }

    async fn remove_expired_locks(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.locks.len();
        self.locks.retain(|_, l| !l.is_expired(now));
        Ok(before.saturating_sub(self.locks.len()))
    }
}

#[async_trait]
impl VersionStore for InMemoryStore {
    async fn insert_next(
        &self,
        document_id: &str,
        version: NewVersion,
    ) -> Result<DocumentVersion, StoreError> {
        let mut history = self.versions.entry(document_id.to_string()).or_default();
        let latest = history.iter().max_by_key(|v| v.version.version_number);
        let version_number = latest.map_or(1, |v| v.version.version_number + 1);
        let parent_version_id = latest.map(|v| v.version.id.clone());

        let stored = DocumentVersion {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            version_number,
            title: version.title,
            content_type: version.content_type,
            content_sha256: version.content_sha256,
            size_bytes: version.size_bytes,
            created_by: version.created_by,
            parent_version_id,
            status: VersionStatus::Draft,
            approval: None,
            created_at: version.created_at,
        };
        history.push(StoredVersion {
            version: stored.clone(),
            content: version.content,
        });
        Ok(stored)
    }

    async fn get_version(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        Ok(self.versions.get(document_id).and_then(|history| {
            history
                .iter()
                .find(|v| v.version.id == version_id)
                .map(|v| v.version.clone())
        }))
    }

    async fn get_content(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<Option<EncryptedContent>, StoreError> {
        Ok(self.versions.get(document_id).and_then(|history| {
            history
                .iter()
                .find(|v| v.version.id == version_id)
                .map(|v| v.content.clone())
        }))
    }

    async fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>, StoreError> {
        let mut versions: Vec<DocumentVersion> = self
            .versions
            .get(document_id)
            .map(|history| history.iter().map(|v| v.version.clone()).collect())
            .unwrap_or_default();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn transition_status(
        &self,
        document_id: &str,
        version_id: &str,
        from: &[VersionStatus],
        to: VersionStatus,
        approval: Option<Approval>,
    ) -> Result<StatusTransition, StoreError> {
        let Some(mut history) = self.versions.get_mut(document_id) else {
            return Ok(StatusTransition::Missing);
        };
        let Some(stored) = history.iter_mut().find(|v| v.version.id == version_id) else {
            return Ok(StatusTransition::Missing);
        };
        if !from.contains(&stored.version.status) {
            return Ok(StatusTransition::Rejected(stored.version.clone()));
        }
        stored.version.status = to;
        if approval.is_some() {
            stored.version.approval = approval;
        }
        Ok(StatusTransition::Updated(stored.version.clone()))
    }
}

#[async_trait]
impl AccessEventStore for InMemoryStore {
    async fn append_event(&self, event: DocumentAccessEvent) -> Result<(), StoreError> {
        self.access_events
            .lock()
            .map_err(|_| poisoned("access event"))?
            .push(event);
        Ok(())
    }

    async fn count_events(
        &self,
        document_id: &str,
        principal_id: &str,
        action: AccessAction,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let events = self
            .access_events
            .lock()
            .map_err(|_| poisoned("access event"))?;
        Ok(events
            .iter()
            .filter(|e| {
                e.document_id == document_id
                    && e.principal_id == principal_id
                    && e.action == action
                    && e.timestamp > since
            })
            .count())
    }

    async fn events_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<DocumentAccessEvent>, StoreError> {
        let events = self
            .access_events
            .lock()
            .map_err(|_| poisoned("access event"))?;
        Ok(events
            .iter()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DlpStore for InMemoryStore {
    async fn put_scan(&self, result: DlpScanResult) -> Result<(), StoreError> {
        self.scans.insert(result.document_id.clone(), result);
        Ok(())
    }

    async fn get_scan(&self, document_id: &str) -> Result<Option<DlpScanResult>, StoreError> {
        Ok(self.scans.get(document_id).map(|s| s.clone()))
    }

    async fn mark_reviewed(
        &self,
        document_id: &str,
        reviewer_id: &str,
    ) -> Result<Option<DlpScanResult>, StoreError> {
        Ok(self.scans.get_mut(document_id).map(|mut scan| {
            scan.approved = true;
            scan.reviewed_by = Some(reviewer_id.to_string());
            scan.clone()
        }))
    }
}

#[async_trait]
impl DocumentPolicyStore for InMemoryStore {
    async fn put_policy(
        &self,
        document_id: &str,
        policy: DocumentPolicy,
    ) -> Result<(), StoreError> {
        self.policies.insert(document_id.to_string(), policy);
        Ok(())
    }

    async fn get_policy(&self, document_id: &str) -> Result<Option<DocumentPolicy>, StoreError> {
        Ok(self.policies.get(document_id).map(|p| p.clone()))
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        self.audit_log
            .lock()
            .map_err(|_| poisoned("audit log"))?
            .push(entry);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, StoreError> {
        let log = self.audit_log.lock().map_err(|_| poisoned("audit log"))?;
        let matching = log.iter().filter(|e| query.matches(e)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}
