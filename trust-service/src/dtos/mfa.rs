use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{MfaMethod, TrustedDevice};
use crate::services::mfa::Verification;

/// The first factor is enrolled before a session exists, so the principal is
/// named in the body. Later enrollments must come from that principal's session.
#[derive(Debug, Deserialize, Validate)]
pub struct EnrollRequest {
    #[validate(length(min = 1, message = "principal_id is required"))]
    pub principal_id: String,
    pub method: MfaMethod,
    /// Phone number for `sms`, address for `email` and the account label for `totp`.
    #[validate(length(min = 1, max = 320))]
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub method: MfaMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChallengeRequest {
    #[validate(length(min = 1, message = "principal_id is required"))]
    pub principal_id: String,
    pub method: MfaMethod,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    #[validate(length(min = 1, message = "principal_id is required"))]
    pub principal_id: String,
    pub method: MfaMethod,
    #[validate(length(min = 6, max = 16, message = "Code must be 6 to 16 characters"))]
    pub code: String,
    /// Trust the device named by `x-device-fingerprint` once the code verifies.
    #[serde(default)]
    pub remember_device: bool,
    #[validate(length(min = 1, max = 100))]
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    #[serde(flatten)]
    pub verification: Verification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_device: Option<TrustedDevice>,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub codes: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TrustDeviceRequest {
    #[validate(length(min = 1, max = 100, message = "Device name is required"))]
    pub name: String,
}
