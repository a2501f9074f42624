use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Role;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, message = "principal_id is required"))]
    pub principal_id: String,
    pub role: Option<Role>,
    #[validate(length(min = 1, max = 256, message = "device_fingerprint is required"))]
    pub device_fingerprint: String,
    #[serde(default)]
    pub mfa_verified: bool,
    /// Returned by `/mfa/verify` when called with the device fingerprint header.
    #[validate(length(min = 1, max = 64))]
    pub verification_id: Option<String>,
    #[serde(default)]
    pub trusted_device: bool,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub expires_at: DateTime<Utc>,
}
