//! MFA factor enrollments, pending challenges and trusted devices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Totp,
    Sms,
    Email,
    BackupCode,
}

impl MfaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMethod::Totp => "totp",
            MfaMethod::Sms => "sms",
            MfaMethod::Email => "email",
            MfaMethod::BackupCode => "backup_code",
        }
    }

    /// Methods verified through a dispatched, single-use challenge code.
    pub fn uses_challenge(&self) -> bool {
        matches!(self, MfaMethod::Sms | MfaMethod::Email)
    }
}

impl fmt::Display for MfaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared TOTP secret for one principal.
#[derive(Clone)]
pub struct TotpEnrollment {
    pub principal_id: String,
    pub secret: Vec<u8>,
    /// Set once a code generated from the secret has been accepted.
    pub confirmed: bool,
    /// Highest time step already accepted; codes at or below it are replays.
    pub last_used_step: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for TotpEnrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpEnrollment")
            .field("principal_id", &self.principal_id)
            .field("secret", &"[REDACTED]")
            .field("confirmed", &self.confirmed)
            .field("last_used_step", &self.last_used_step)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Delivery address for SMS or email codes. A new address stays pending,
/// next to any verified one, until a code sent to it is verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaContact {
    pub principal_id: String,
    pub method: MfaMethod,
    pub destination: String,
    pub verified: bool,
}

/// Pending SMS/email code awaiting verification.
#[derive(Debug, Clone)]
pub struct MfaChallenge {
    pub id: String,
    pub principal_id: String,
    pub method: MfaMethod,
    /// Where the code was sent.
    pub destination: String,
    pub code_hash: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MfaChallenge {
    pub fn new(
        principal_id: &str,
        method: MfaMethod,
        destination: &str,
        code_hash: String,
        max_attempts: u32,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            principal_id: principal_id.to_string(),
            method,
            destination: destination.to_string(),
            code_hash,
            attempts: 0,
            max_attempts,
            consumed: false,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// One-time evidence of a successful MFA check, redeemable for a session
/// from the device that performed the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaProof {
    pub id: String,
    pub principal_id: String,
    pub device_fingerprint: String,
    pub method: MfaMethod,
    pub expires_at: DateTime<Utc>,
}

impl MfaProof {
    pub fn new(
        principal_id: &str,
        device_fingerprint: &str,
        method: MfaMethod,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            principal_id: principal_id.to_string(),
            device_fingerprint: device_fingerprint.to_string(),
            method,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of presenting a backup code to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupCodeOutcome {
    Consumed { remaining: u32 },
    NoMatch { remaining: u32 },
    NotGenerated,
}

/// Client-reported device details used when trusting a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub fingerprint: String,
    pub name: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Device exempted from MFA prompts until `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub id: String,
    pub principal_id: String,
    pub fingerprint: String,
    pub name: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TrustedDevice {
    pub fn new(
        principal_id: &str,
        info: DeviceInfo,
        now: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            principal_id: principal_id.to_string(),
            fingerprint: info.fingerprint,
            name: info.name,
            ip_address: info.ip_address,
            user_agent: info.user_agent,
            last_used_at: now,
            expires_at: now + lifetime,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
