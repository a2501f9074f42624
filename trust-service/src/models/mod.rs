//! Data model for the trust core.

pub mod access;
pub mod audit_log;
pub mod dlp;
pub mod document;
pub mod mfa;
pub mod permission;
pub mod principal;
pub mod session;

pub use access::{AccessAction, AccessContext, AccessSummary, DocumentAccessEvent};
pub use audit_log::{AuditAction, AuditLogEntry, AuditQuery};
pub use dlp::{DlpScanResult, Finding, FindingCategory, FindingType, RiskLevel, Severity};
pub use document::{
    Approval, DocumentLock, DocumentPolicy, DocumentVersion, EncryptedContent, LockType,
    NewVersion, VersionStatus,
};
pub use mfa::{
    BackupCodeOutcome, DeviceInfo, MfaChallenge, MfaContact, MfaMethod, MfaProof, TotpEnrollment,
    TrustedDevice,
};
pub use permission::{Action, PermissionGrant, PermissionRequest, ResourceType, Role};
pub use principal::{NewPrincipal, Principal};
pub use session::{NewSession, Session};
