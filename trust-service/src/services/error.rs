use chrono::{DateTime, Utc};
use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;

/// Caller-facing failure categories. Callers branch on these to decide between
/// re-prompting, denying, waiting or escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Conflict,
    PolicyViolation,
    NotFound,
    Validation,
    Internal,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    // Authentication
    #[error("Multi-factor authentication required")]
    MfaRequired,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code has expired")]
    CodeExpired,

    #[error("Too many verification attempts")]
    TooManyAttempts,

    #[error("All backup codes have been used")]
    BackupCodesExhausted,

    #[error("MFA method {0} is not enrolled")]
    MethodNotEnrolled(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session is bound to a different device")]
    DeviceMismatch,

    // Authorization
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Principal is deactivated")]
    PrincipalInactive,

    // Conflict
    #[error("Document locked by {holder} until {} UTC", .expires_at.format("%H:%M"))]
    AlreadyLocked {
        holder: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Document must be locked by you before creating a version")]
    LockRequired,

    #[error("You do not hold the lock on this document")]
    LockNotHeld,

    #[error("Version is already approved")]
    AlreadyApproved,

    #[error("Version is not in an editable state")]
    InvalidTransition,

    #[error("{0} already exists")]
    AlreadyExists(String),

    // Policy
    #[error("Download limit of {limit} per day exceeded")]
    DownloadLimitExceeded { limit: u32 },

    #[error("Printing is restricted for this document")]
    PrintRestricted,

    #[error("Security review required before this action")]
    SecurityReviewRequired,

    #[error("Access to this document has expired")]
    AccessExpired,

    // Not found
    #[error("{0} not found")]
    NotFound(String),

    // Validation
    #[error("Invalid phone number format. Use E.164 format (+14155550123)")]
    InvalidPhoneFormat,

    #[error("Invalid email format")]
    InvalidEmailFormat,

    #[error("Validation error: {0}")]
    Validation(String),

    // Internal
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound(what.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::MfaRequired
            | ServiceError::InvalidCode
            | ServiceError::CodeExpired
            | ServiceError::TooManyAttempts
            | ServiceError::BackupCodesExhausted
            | ServiceError::MethodNotEnrolled(_)
            | ServiceError::SessionNotFound
            | ServiceError::SessionExpired
            | ServiceError::DeviceMismatch => ErrorKind::Authentication,
            ServiceError::PermissionDenied(_) | ServiceError::PrincipalInactive => {
                ErrorKind::Authorization
            }
            ServiceError::AlreadyLocked { .. }
            | ServiceError::LockRequired
            | ServiceError::LockNotHeld
            | ServiceError::AlreadyApproved
            | ServiceError::InvalidTransition
            | ServiceError::AlreadyExists(_) => ErrorKind::Conflict,
            ServiceError::DownloadLimitExceeded { .. }
            | ServiceError::PrintRestricted
            | ServiceError::SecurityReviewRequired
            | ServiceError::AccessExpired => ErrorKind::PolicyViolation,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::InvalidPhoneFormat
            | ServiceError::InvalidEmailFormat
            | ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Encryption(_) | ServiceError::Storage(_) | ServiceError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let text = err.to_string();
        let message = anyhow::anyhow!(text.clone());
        match err {
            ServiceError::DownloadLimitExceeded { .. } => AppError::TooManyRequests(text, None),
            ServiceError::Storage(e) => AppError::InternalError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Encryption(e) => AppError::InternalError(anyhow::anyhow!(e)),
            other => match other.kind() {
                ErrorKind::Authentication => AppError::AuthError(message),
                ErrorKind::Authorization => AppError::Forbidden(message),
                ErrorKind::Conflict => AppError::Conflict(message),
                ErrorKind::PolicyViolation => AppError::PolicyViolation(message),
                ErrorKind::NotFound => AppError::NotFound(message),
                ErrorKind::Validation => AppError::BadRequest(message),
                ErrorKind::Internal => AppError::InternalError(message),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lock_conflict_message_is_actionable() {
        let err = ServiceError::AlreadyLocked {
            holder: "J. Smith".to_string(),
            expires_at: Utc.with_ymd_and_hms(2026, 3, 1, 14, 32, 0).unwrap(),
        };
        assert_eq!(err.to_string(), "Document locked by J. Smith until 14:32 UTC");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ServiceError::BackupCodesExhausted.kind(), ErrorKind::Authentication);
        assert_eq!(
            ServiceError::SecurityReviewRequired.kind(),
            ErrorKind::PolicyViolation
        );
        assert_eq!(ServiceError::InvalidPhoneFormat.kind(), ErrorKind::Validation);
        assert_eq!(
            ServiceError::PermissionDenied("document:edit".to_string()).kind(),
            ErrorKind::Authorization
        );
    }

    #[test]
    fn test_app_error_mapping() {
        let app: AppError = ServiceError::AlreadyApproved.into();
        assert!(matches!(app, AppError::Conflict(_)));

        let app: AppError = ServiceError::DownloadLimitExceeded { limit: 3 }.into();
        assert!(matches!(app, AppError::TooManyRequests(_, _)));

        let app: AppError = ServiceError::Storage(StoreError::Unavailable("down".into())).into();
        assert!(matches!(app, AppError::InternalError(_)));
    }
}
