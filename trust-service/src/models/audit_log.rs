use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PrincipalRegistered,
    PrincipalDeactivated,
    RoleAssigned,
    PermissionGranted,
    PermissionRevoked,
    MfaEnrolled,
    MfaChallengeSent,
    MfaVerified,
    MfaVerificationFailed,
    BackupCodesGenerated,
    DeviceTrusted,
    DeviceRevoked,
    SessionCreated,
    SessionRefreshed,
    SessionDestroyed,
    DocumentScanned,
    DlpReviewApproved,
    DocumentPolicyUpdated,
    DocumentAccessed,
    DocumentAccessDenied,
    DocumentLocked,
    DocumentUnlocked,
    DocumentLockOverridden,
    VersionCreated,
    VersionSubmitted,
    VersionApproved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PrincipalRegistered => "principal_registered",
            AuditAction::PrincipalDeactivated => "principal_deactivated",
            AuditAction::RoleAssigned => "role_assigned",
            AuditAction::PermissionGranted => "permission_granted",
            AuditAction::PermissionRevoked => "permission_revoked",
            AuditAction::MfaEnrolled => "mfa_enrolled",
            AuditAction::MfaChallengeSent => "mfa_challenge_sent",
            AuditAction::MfaVerified => "mfa_verified",
            AuditAction::MfaVerificationFailed => "mfa_verification_failed",
            AuditAction::BackupCodesGenerated => "backup_codes_generated",
            AuditAction::DeviceTrusted => "device_trusted",
            AuditAction::DeviceRevoked => "device_revoked",
            AuditAction::SessionCreated => "session_created",
            AuditAction::SessionRefreshed => "session_refreshed",
            AuditAction::SessionDestroyed => "session_destroyed",
            AuditAction::DocumentScanned => "document_scanned",
            AuditAction::DlpReviewApproved => "dlp_review_approved",
            AuditAction::DocumentPolicyUpdated => "document_policy_updated",
            AuditAction::DocumentAccessed => "document_accessed",
            AuditAction::DocumentAccessDenied => "document_access_denied",
            AuditAction::DocumentLocked => "document_locked",
            AuditAction::DocumentUnlocked => "document_unlocked",
            AuditAction::DocumentLockOverridden => "document_lock_overridden",
            AuditAction::VersionCreated => "version_created",
            AuditAction::VersionSubmitted => "version_submitted",
            AuditAction::VersionApproved => "version_approved",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only compliance record. Application code never mutates or deletes one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    /// Actor who performed the action
    pub principal_id: String,
    pub action: AuditAction,
    pub details: String,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        principal_id: impl Into<String>,
        action: AuditAction,
        details: impl Into<String>,
        ip_address: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            principal_id: principal_id.into(),
            action,
            details: details.into(),
            ip_address,
            timestamp,
        }
    }
}

/// Compliance report filters. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub principal_id: Option<String>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.principal_id
            .as_deref()
            .map_or(true, |p| entry.principal_id == p)
            && self.action.map_or(true, |a| entry.action == a)
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp <= to)
    }
}
