//! MFA engine: TOTP, SMS/email challenges, backup codes and trusted devices.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use validator::ValidateEmail;

use super::audit::AuditGateway;
use super::clock::Clock;
use super::notifier::ChallengeDispatcher;
use super::store::{MfaStore, PrincipalStore, TrustedDeviceStore};
use super::{totp, Actor, ServiceError};
use crate::config::MfaConfig;
use crate::models::{
    AuditAction, BackupCodeOutcome, DeviceInfo, MfaChallenge, MfaContact, MfaMethod, MfaProof,
    Principal, TotpEnrollment, TrustedDevice,
};

pub const BACKUP_CODE_COUNT: usize = 10;
pub const BACKUP_CODE_LENGTH: usize = 8;
pub const CHALLENGE_CODE_LENGTH: usize = 6;

static E164: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[1-9]\d{7,14}$").expect("E.164 pattern is valid"));

/// What an authenticator app needs to start producing codes.
#[derive(Debug, Clone, Serialize)]
pub struct TotpSetup {
    pub secret: String,
    pub qr_payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub method: MfaMethod,
    pub verified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_codes_remaining: Option<u32>,
    /// One-time proof for opening a session from the verifying device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_id: Option<String>,
}

#[derive(Clone)]
pub struct MfaService {
    principals: Arc<dyn PrincipalStore>,
    store: Arc<dyn MfaStore>,
    devices: Arc<dyn TrustedDeviceStore>,
    dispatcher: Arc<dyn ChallengeDispatcher>,
    audit: AuditGateway,
    clock: Arc<dyn Clock>,
    config: MfaConfig,
}

fn generate_code(length: usize) -> String {
    (0..length)
        .map(|_| OsRng.gen_range(0..10).to_string())
        .collect()
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn record_failure(method: MfaMethod, reason: &'static str) {
    metrics::counter!(
        "mfa_verification_failures_total",
        "method" => method.as_str(),
        "reason" => reason
    )
    .increment(1);
}

impl MfaService {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        store: Arc<dyn MfaStore>,
        devices: Arc<dyn TrustedDeviceStore>,
        dispatcher: Arc<dyn ChallengeDispatcher>,
        audit: AuditGateway,
        clock: Arc<dyn Clock>,
        config: MfaConfig,
    ) -> Self {
        Self {
            principals,
            store,
            devices,
            dispatcher,
            audit,
            clock,
            config,
        }
    }

    async fn active_principal(&self, principal_id: &str) -> Result<Principal, ServiceError> {
        let principal = self
            .principals
            .get_principal(principal_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Principal"))?;
        if !principal.active {
            return Err(ServiceError::PrincipalInactive);
        }
        Ok(principal)
    }

    /// A principal with no factor yet may enroll freely. Once one is
    /// confirmed, adding or replacing a factor needs a live session of that
    /// principal and a verification inside the trust window.
    async fn authorize_enrollment(&self, actor: &Actor) -> Result<(), ServiceError> {
        let principal = self.active_principal(&actor.id).await?;
        if principal.mfa_enrolled_methods.is_empty() {
            return Ok(());
        }
        if actor.session_id.is_none() || !self.recently_verified(&actor.id).await? {
            tracing::warn!(principal_id = %actor.id, "Enrollment refused without step-up");
            metrics::counter!("mfa_enrollment_refused_total").increment(1);
            return Err(ServiceError::MfaRequired);
        }
        Ok(())
    }

    /// Generates a fresh pending secret. It replaces the confirmed one only
    /// once a code from it verifies; until then the old secret keeps working.
    pub async fn enroll_totp(
        &self,
        actor: &Actor,
        account_email: &str,
    ) -> Result<TotpSetup, ServiceError> {
        self.authorize_enrollment(actor).await?;
        if !account_email.validate_email() {
            return Err(ServiceError::InvalidEmailFormat);
        }

        let secret = totp::generate_secret();
        let setup = TotpSetup {
            secret: totp::base32_encode(&secret),
            qr_payload: totp::provisioning_uri(&self.config.totp_issuer, account_email, &secret),
        };
        self.store
            .put_pending_totp(TotpEnrollment {
                principal_id: actor.id.clone(),
                secret,
                confirmed: false,
                last_used_step: None,
                created_at: self.clock.now(),
            })
            .await?;

        tracing::info!(principal_id = %actor.id, "TOTP enrollment started");
        self.audit
            .record(
                &actor.id,
                AuditAction::MfaEnrolled,
                "method=totp",
                actor.ip_address.clone(),
            )
            .await;
        Ok(setup)
    }

    pub async fn enroll_sms(&self, actor: &Actor, phone: &str) -> Result<(), ServiceError> {
        if !E164.is_match(phone) {
            return Err(ServiceError::InvalidPhoneFormat);
        }
        self.enroll_contact(actor, MfaMethod::Sms, phone).await
    }

    pub async fn enroll_email(&self, actor: &Actor, email: &str) -> Result<(), ServiceError> {
        if !email.validate_email() {
            return Err(ServiceError::InvalidEmailFormat);
        }
        self.enroll_contact(actor, MfaMethod::Email, email).await
    }

    /// Stores the destination as pending and dispatches a confirmation code.
    /// Returns as soon as the dispatch is handed off.
    async fn enroll_contact(
        &self,
        actor: &Actor,
        method: MfaMethod,
        destination: &str,
    ) -> Result<(), ServiceError> {
        self.authorize_enrollment(actor).await?;
        self.store
            .put_pending_contact(MfaContact {
                principal_id: actor.id.clone(),
                method,
                destination: destination.to_string(),
                verified: false,
            })
            .await?;
        self.issue_challenge(&actor.id, method, destination).await?;

        tracing::info!(principal_id = %actor.id, method = %method, "MFA contact enrolled");
        self.audit
            .record(
                &actor.id,
                AuditAction::MfaEnrolled,
                format!("method={}", method),
                actor.ip_address.clone(),
            )
            .await;
        Ok(())
    }

    /// Sends a fresh code to the verified destination, or to the pending one
    /// while enrollment is unfinished. Replaces any outstanding code.
    pub async fn send_challenge(
        &self,
        actor: &Actor,
        method: MfaMethod,
    ) -> Result<(), ServiceError> {
        if !method.uses_challenge() {
            return Err(ServiceError::Validation(format!(
                "{} does not use dispatched codes",
                method
            )));
        }
        self.active_principal(&actor.id).await?;
        let contact = match self.store.get_contact(&actor.id, method).await? {
            Some(contact) => contact,
            None => self
                .store
                .get_pending_contact(&actor.id, method)
                .await?
                .ok_or_else(|| ServiceError::MethodNotEnrolled(method.to_string()))?,
        };
        self.issue_challenge(&actor.id, method, &contact.destination)
            .await?;

        self.audit
            .record(
                &actor.id,
                AuditAction::MfaChallengeSent,
                format!("method={}", method),
                actor.ip_address.clone(),
            )
            .await;
        Ok(())
    }

    async fn issue_challenge(
        &self,
        principal_id: &str,
        method: MfaMethod,
        destination: &str,
    ) -> Result<(), ServiceError> {
        let code = generate_code(CHALLENGE_CODE_LENGTH);
        let challenge = MfaChallenge::new(
            principal_id,
            method,
            destination,
            hash_code(&code),
            self.config.max_attempts,
            self.clock.now(),
            Duration::minutes(self.config.challenge_ttl_minutes),
        );
        self.store.put_challenge(challenge).await?;

        let dispatcher = self.dispatcher.clone();
        let destination = destination.to_string();
        let principal_id = principal_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.deliver(method, &destination, &code).await {
                tracing::error!(
                    principal_id = %principal_id,
                    method = %method,
                    error = %e,
                    "Challenge delivery failed"
                );
            }
        });
        Ok(())
    }

    /// Replaces any previous set. Only hashes are kept.
    pub async fn generate_backup_codes(&self, actor: &Actor) -> Result<Vec<String>, ServiceError> {
        self.active_principal(&actor.id).await?;
        let codes: Vec<String> = (0..BACKUP_CODE_COUNT)
            .map(|_| generate_code(BACKUP_CODE_LENGTH))
            .collect();
        self.store
            .replace_backup_codes(&actor.id, codes.iter().map(|c| hash_code(c)).collect())
            .await?;
        self.principals
            .set_backup_codes_remaining(&actor.id, BACKUP_CODE_COUNT as u32)
            .await?;
        self.principals
            .add_mfa_method(&actor.id, MfaMethod::BackupCode)
            .await?;

        self.audit
            .record(
                &actor.id,
                AuditAction::BackupCodesGenerated,
                format!("count={}", BACKUP_CODE_COUNT),
                actor.ip_address.clone(),
            )
            .await;
        Ok(codes)
    }

    /// Checks one factor. Failures are audited and surfaced with their own
    /// error kind.
    pub async fn verify(
        &self,
        actor: &Actor,
        method: MfaMethod,
        code: &str,
    ) -> Result<Verification, ServiceError> {
        self.active_principal(&actor.id).await?;

        let outcome = match method {
            MfaMethod::Totp => self.verify_totp(&actor.id, code).await,
            MfaMethod::Sms | MfaMethod::Email => {
                self.verify_challenge(&actor.id, method, code).await
            }
            MfaMethod::BackupCode => self.verify_backup_code(&actor.id, code).await,
        };

        match outcome {
            Ok(backup_codes_remaining) => {
                let verified_at = self.clock.now();
                self.store
                    .record_verification(&actor.id, verified_at)
                    .await?;
                self.principals.add_mfa_method(&actor.id, method).await?;

                tracing::info!(principal_id = %actor.id, method = %method, "MFA verified");
                self.audit
                    .record(
                        &actor.id,
                        AuditAction::MfaVerified,
                        format!("method={}", method),
                        actor.ip_address.clone(),
                    )
                    .await;
                Ok(Verification {
                    method,
                    verified_at,
                    backup_codes_remaining,
                    verification_id: None,
                })
            }
            Err(e) => {
                tracing::warn!(
                    principal_id = %actor.id,
                    method = %method,
                    error = %e,
                    "MFA verification failed"
                );
                self.audit
                    .record(
                        &actor.id,
                        AuditAction::MfaVerificationFailed,
                        format!("method={} reason={}", method, e),
                        actor.ip_address.clone(),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// [`Self::verify`] for a login. On success also issues a one-time proof
    /// bound to `device_fingerprint` that opens exactly one session.
    pub async fn verify_for_device(
        &self,
        actor: &Actor,
        method: MfaMethod,
        code: &str,
        device_fingerprint: &str,
    ) -> Result<Verification, ServiceError> {
        if device_fingerprint.trim().is_empty() {
            return Err(ServiceError::Validation(
                "device fingerprint is required".to_string(),
            ));
        }
        let mut verification = self.verify(actor, method, code).await?;
        let proof = MfaProof::new(
            &actor.id,
            device_fingerprint,
            method,
            verification.verified_at,
            Duration::minutes(self.config.trust_window_minutes),
        );
        verification.verification_id = Some(proof.id.clone());
        self.store.put_proof(proof).await?;
        Ok(verification)
    }

    /// Consumes the proof. True only for its own principal and device, once.
    pub async fn redeem_proof(
        &self,
        principal_id: &str,
        verification_id: &str,
        device_fingerprint: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .store
            .take_proof(
                verification_id,
                principal_id,
                device_fingerprint,
                self.clock.now(),
            )
            .await?
            .is_some())
    }

    /// The confirmed secret answers first; a pending one is promoted by its
    /// first accepted code.
    async fn verify_totp(&self, principal_id: &str, code: &str) -> Result<Option<u32>, ServiceError> {
        let confirmed = self.store.get_totp(principal_id).await?;
        let pending = self.store.get_pending_totp(principal_id).await?;
        if confirmed.is_none() && pending.is_none() {
            return Err(ServiceError::MethodNotEnrolled(MfaMethod::Totp.to_string()));
        }
        let now = self.clock.now().timestamp();

        if let Some(enrollment) = confirmed {
            if let Some(step) = totp::matching_step(&enrollment.secret, code, now)? {
                if !self.store.record_totp_step(principal_id, step).await? {
                    record_failure(MfaMethod::Totp, "replay");
                    return Err(ServiceError::InvalidCode);
                }
                return Ok(None);
            }
        }

        if let Some(enrollment) = pending {
            if let Some(step) = totp::matching_step(&enrollment.secret, code, now)? {
                if !self
                    .store
                    .confirm_pending_totp(principal_id, &enrollment.secret, step)
                    .await?
                {
                    record_failure(MfaMethod::Totp, "replay");
                    return Err(ServiceError::InvalidCode);
                }
                tracing::info!(principal_id = %principal_id, "TOTP secret confirmed");
                return Ok(None);
            }
        }

        record_failure(MfaMethod::Totp, "mismatch");
        Err(ServiceError::InvalidCode)
    }

    async fn verify_challenge(
        &self,
        principal_id: &str,
        method: MfaMethod,
        code: &str,
    ) -> Result<Option<u32>, ServiceError> {
        let Some(challenge) = self.store.get_challenge(principal_id, method).await? else {
            if self.store.get_contact(principal_id, method).await?.is_none()
                && self
                    .store
                    .get_pending_contact(principal_id, method)
                    .await?
                    .is_none()
            {
                return Err(ServiceError::MethodNotEnrolled(method.to_string()));
            }
            record_failure(method, "no_challenge");
            return Err(ServiceError::InvalidCode);
        };

        if challenge.consumed {
            record_failure(method, "consumed");
            return Err(ServiceError::InvalidCode);
        }
        if challenge.is_expired(self.clock.now()) {
            record_failure(method, "expired");
            return Err(ServiceError::CodeExpired);
        }
        if challenge.attempts >= challenge.max_attempts {
            record_failure(method, "attempts");
            return Err(ServiceError::TooManyAttempts);
        }

        let attempts = self.store.increment_challenge_attempts(&challenge.id).await?;
        let matches: bool = hash_code(code)
            .as_bytes()
            .ct_eq(challenge.code_hash.as_bytes())
            .into();
        if !matches {
            record_failure(method, "mismatch");
            if attempts >= challenge.max_attempts {
                return Err(ServiceError::TooManyAttempts);
            }
            return Err(ServiceError::InvalidCode);
        }
        if attempts > challenge.max_attempts {
            return Err(ServiceError::TooManyAttempts);
        }

        if !self.store.consume_challenge(&challenge.id).await? {
            record_failure(method, "consumed");
            return Err(ServiceError::InvalidCode);
        }
        // A code sent to a pending destination promotes it.
        let verified = self.store.get_contact(principal_id, method).await?;
        if verified.map(|c| c.destination) != Some(challenge.destination.clone())
            && !self
                .store
                .confirm_pending_contact(principal_id, method, &challenge.destination)
                .await?
        {
            record_failure(method, "stale_destination");
            return Err(ServiceError::InvalidCode);
        }
        Ok(None)
    }

    async fn verify_backup_code(
        &self,
        principal_id: &str,
        code: &str,
    ) -> Result<Option<u32>, ServiceError> {
        match self
            .store
            .consume_backup_code(principal_id, &hash_code(code))
            .await?
        {
            BackupCodeOutcome::Consumed { remaining } => {
                self.principals
                    .set_backup_codes_remaining(principal_id, remaining)
                    .await?;
                if remaining == 0 {
                    tracing::warn!(principal_id = %principal_id, "Last backup code used");
                }
                Ok(Some(remaining))
            }
            BackupCodeOutcome::NoMatch { remaining: 0 } => {
                record_failure(MfaMethod::BackupCode, "exhausted");
                Err(ServiceError::BackupCodesExhausted)
            }
            BackupCodeOutcome::NoMatch { .. } => {
                record_failure(MfaMethod::BackupCode, "mismatch");
                Err(ServiceError::InvalidCode)
            }
            BackupCodeOutcome::NotGenerated => Err(ServiceError::MethodNotEnrolled(
                MfaMethod::BackupCode.to_string(),
            )),
        }
    }

    /// True when the principal completed an MFA check within the trust window.
    pub async fn recently_verified(&self, principal_id: &str) -> Result<bool, ServiceError> {
        let window = Duration::minutes(self.config.trust_window_minutes);
        Ok(self
            .store
            .last_verification(principal_id)
            .await?
            .is_some_and(|at| self.clock.now() - at <= window))
    }

    /// Pure lookup with expiry comparison. Never renews.
    pub async fn is_trusted_device(
        &self,
        principal_id: &str,
        fingerprint: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .devices
            .find_device(principal_id, fingerprint)
            .await?
            .is_some_and(|d| d.is_active(self.clock.now())))
    }

    /// Only allowed right after a fresh MFA verification.
    pub async fn trust_device(
        &self,
        actor: &Actor,
        info: DeviceInfo,
    ) -> Result<TrustedDevice, ServiceError> {
        self.active_principal(&actor.id).await?;
        if !self.recently_verified(&actor.id).await? {
            return Err(ServiceError::MfaRequired);
        }
        if info.fingerprint.trim().is_empty() {
            return Err(ServiceError::Validation(
                "device fingerprint is required".to_string(),
            ));
        }

        let device = TrustedDevice::new(
            &actor.id,
            info,
            self.clock.now(),
            Duration::days(self.config.trusted_device_days),
        );
        self.devices.upsert_device(device.clone()).await?;

        tracing::info!(principal_id = %actor.id, device_id = %device.id, "Device trusted");
        self.audit
            .record(
                &actor.id,
                AuditAction::DeviceTrusted,
                format!("device_id={} name={}", device.id, device.name),
                actor.ip_address.clone(),
            )
            .await;
        Ok(device)
    }

    pub async fn revoke_trusted_device(
        &self,
        actor: &Actor,
        device_id: &str,
    ) -> Result<(), ServiceError> {
        if !self.devices.remove_device(&actor.id, device_id).await? {
            return Err(ServiceError::not_found("Trusted device"));
        }
        self.audit
            .record(
                &actor.id,
                AuditAction::DeviceRevoked,
                format!("device_id={}", device_id),
                actor.ip_address.clone(),
            )
            .await;
        Ok(())
    }

    pub async fn list_trusted_devices(
        &self,
        principal_id: &str,
    ) -> Result<Vec<TrustedDevice>, ServiceError> {
        Ok(self.devices.list_devices(principal_id).await?)
    }

    /// Expired or consumed challenges plus expired verification proofs.
    pub async fn sweep_challenges(&self) -> Result<usize, ServiceError> {
        let now = self.clock.now();
        let challenges = self.store.remove_expired_challenges(now).await?;
        let proofs = self.store.remove_expired_proofs(now).await?;
        Ok(challenges + proofs)
    }
}
