//! Session model - authenticated sessions bound to a device fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Role;

/// Session entity. Immutable after creation except for `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub principal_id: String,
    pub role: Role,
    pub device_fingerprint: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub mfa_verified: bool,
    pub trusted_device: bool,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Input for session creation. `mfa_verified` and `trusted_device` are claims
/// that the session manager re-checks before issuing anything.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub principal_id: String,
    pub role: Option<Role>,
    pub device_fingerprint: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub mfa_verified: bool,
    /// Proof returned by the MFA check that backs `mfa_verified`.
    pub verification_id: Option<String>,
    pub trusted_device: bool,
}
