//! Document security engine: encryption envelope, watermarking, DLP scans,
//! the access ledger and the policy gate in front of gated actions.

use chrono::Duration;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::audit::AuditGateway;
use super::clock::Clock;
use super::crypto::DocumentCipher;
use super::dlp;
use super::store::{AccessEventStore, DlpStore, DocumentPolicyStore};
use super::watermark::{RecipientInfo, WatermarkSpec, WatermarkTag, Watermarker};
use super::{Actor, ServiceError};
use crate::models::{
    AccessAction, AccessContext, AccessSummary, AuditAction, DlpScanResult, DocumentAccessEvent,
    DocumentPolicy, EncryptedContent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenialReason {
    AccessExpired,
    DownloadLimitExceeded { limit: u32 },
    PrintRestricted,
    SecurityReviewRequired,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::AccessExpired => "access_expired",
            DenialReason::DownloadLimitExceeded { .. } => "download_limit_exceeded",
            DenialReason::PrintRestricted => "print_restricted",
            DenialReason::SecurityReviewRequired => "security_review_required",
        }
    }
}

impl From<DenialReason> for ServiceError {
    fn from(reason: DenialReason) -> Self {
        match reason {
            DenialReason::AccessExpired => ServiceError::AccessExpired,
            DenialReason::DownloadLimitExceeded { limit } => {
                ServiceError::DownloadLimitExceeded { limit }
            }
            DenialReason::PrintRestricted => ServiceError::PrintRestricted,
            DenialReason::SecurityReviewRequired => ServiceError::SecurityReviewRequired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), ServiceError> {
        match self.reason {
            Some(reason) if !self.allowed => Err(reason.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct DocumentSecurityService {
    events: Arc<dyn AccessEventStore>,
    scans: Arc<dyn DlpStore>,
    policies: Arc<dyn DocumentPolicyStore>,
    cipher: DocumentCipher,
    watermarker: Watermarker,
    audit: AuditGateway,
    clock: Arc<dyn Clock>,
    default_download_limit: u32,
}

impl DocumentSecurityService {
    pub fn new(
        events: Arc<dyn AccessEventStore>,
        scans: Arc<dyn DlpStore>,
        policies: Arc<dyn DocumentPolicyStore>,
        cipher: DocumentCipher,
        audit: AuditGateway,
        clock: Arc<dyn Clock>,
        default_download_limit: u32,
    ) -> Result<Self, ServiceError> {
        let watermarker = cipher.watermarker()?;
        Ok(Self {
            events,
            scans,
            policies,
            cipher,
            watermarker,
            audit,
            clock,
            default_download_limit,
        })
    }

    pub fn encrypt(
        &self,
        document_id: &str,
        content: &[u8],
    ) -> Result<EncryptedContent, ServiceError> {
        self.cipher.encrypt(document_id, content)
    }

    /// Every successful decryption is logged as a `view`.
    pub async fn decrypt(
        &self,
        document_id: &str,
        content: &EncryptedContent,
        ctx: &AccessContext,
    ) -> Result<Vec<u8>, ServiceError> {
        let plaintext = self.cipher.decrypt(document_id, content)?;
        self.log_access(document_id, AccessAction::View, ctx).await?;
        Ok(plaintext)
    }

    pub fn apply_watermark(
        &self,
        document_id: &str,
        content: &str,
        spec: &WatermarkSpec,
        recipient: &RecipientInfo,
    ) -> Result<String, ServiceError> {
        self.watermarker
            .apply(document_id, content, spec, recipient, self.clock.now())
    }

    pub fn extract_watermark(&self, document_id: &str, content: &str) -> Option<WatermarkTag> {
        self.watermarker.extract_tag(document_id, content)
    }

    /// Runs the detectors and replaces the document's current result.
    pub async fn scan(
        &self,
        actor: &Actor,
        document_id: &str,
        text: &str,
    ) -> Result<DlpScanResult, ServiceError> {
        let result = dlp::scan_text(document_id, text, self.clock.now());
        self.scans.put_scan(result.clone()).await?;

        metrics::counter!("dlp_scans_total", "risk" => result.risk_level.as_str()).increment(1);
        tracing::info!(
            document_id = %document_id,
            risk = result.risk_level.as_str(),
            findings = result.findings.len(),
            "Document scanned"
        );
        self.audit
            .record(
                &actor.id,
                AuditAction::DocumentScanned,
                format!(
                    "document_id={} risk={} findings={}",
                    document_id,
                    result.risk_level.as_str(),
                    result.findings.len()
                ),
                actor.ip_address.clone(),
            )
            .await;
        Ok(result)
    }

    /// Human sign-off that unblocks gated actions on a risky document.
    pub async fn review_scan(
        &self,
        actor: &Actor,
        document_id: &str,
    ) -> Result<DlpScanResult, ServiceError> {
        let result = self
            .scans
            .mark_reviewed(document_id, &actor.id)
            .await?
            .ok_or_else(|| ServiceError::not_found("DLP scan"))?;

        self.audit
            .record(
                &actor.id,
                AuditAction::DlpReviewApproved,
                format!(
                    "document_id={} risk={}",
                    document_id,
                    result.risk_level.as_str()
                ),
                actor.ip_address.clone(),
            )
            .await;
        Ok(result)
    }

    pub async fn get_scan(&self, document_id: &str) -> Result<Option<DlpScanResult>, ServiceError> {
        Ok(self.scans.get_scan(document_id).await?)
    }

    /// Replaces the stored policy for the document.
    pub async fn set_policy(
        &self,
        actor: &Actor,
        document_id: &str,
        policy: DocumentPolicy,
    ) -> Result<DocumentPolicy, ServiceError> {
        if policy.max_downloads_per_day == Some(0) {
            return Err(ServiceError::Validation(
                "max_downloads_per_day must be at least 1".to_string(),
            ));
        }
        self.policies.put_policy(document_id, policy.clone()).await?;

        tracing::info!(document_id = %document_id, "Document policy updated");
        self.audit
            .record(
                &actor.id,
                AuditAction::DocumentPolicyUpdated,
                format!(
                    "document_id={} download_restrictions={} max_downloads_per_day={:?} print_restrictions={} dlp_enabled={}",
                    document_id,
                    policy.download_restrictions,
                    policy.max_downloads_per_day,
                    policy.print_restrictions,
                    policy.dlp_enabled
                ),
                actor.ip_address.clone(),
            )
            .await;
        Ok(policy)
    }

    /// The stored policy, or the default one for documents without one.
    pub async fn policy_for(&self, document_id: &str) -> Result<DocumentPolicy, ServiceError> {
        Ok(self
            .policies
            .get_policy(document_id)
            .await?
            .unwrap_or_default())
    }

    /// Appends to the access ledger and writes one audit entry.
    pub async fn log_access(
        &self,
        document_id: &str,
        action: AccessAction,
        ctx: &AccessContext,
    ) -> Result<DocumentAccessEvent, ServiceError> {
        let event = DocumentAccessEvent::new(document_id, action, ctx, self.clock.now());
        self.events.append_event(event.clone()).await?;

        metrics::counter!("document_access_total", "action" => action.as_str()).increment(1);
        self.audit
            .record(
                &ctx.principal_id,
                AuditAction::DocumentAccessed,
                format!("document_id={} action={}", document_id, action.as_str()),
                ctx.ip_address.clone(),
            )
            .await;
        Ok(event)
    }

    /// Evaluates the document's stored policy. First failing check wins:
    /// access expiry, download cap, print restriction, then DLP review.
    /// Reads only.
    pub async fn can_perform_action(
        &self,
        document_id: &str,
        principal_id: &str,
        action: AccessAction,
    ) -> Result<AccessDecision, ServiceError> {
        let policy = self.policy_for(document_id).await?;
        let now = self.clock.now();

        if policy.access_expires_at.is_some_and(|at| now >= at) {
            return Ok(self.denied(document_id, DenialReason::AccessExpired));
        }

        if action == AccessAction::Download && policy.download_restrictions {
            let limit = policy
                .max_downloads_per_day
                .unwrap_or(self.default_download_limit);
            let recent = self
                .events
                .count_events(
                    document_id,
                    principal_id,
                    AccessAction::Download,
                    now - Duration::hours(24),
                )
                .await?;
            if recent >= limit as usize {
                return Ok(self.denied(document_id, DenialReason::DownloadLimitExceeded { limit }));
            }
        }

        if action == AccessAction::Print && policy.print_restrictions {
            return Ok(self.denied(document_id, DenialReason::PrintRestricted));
        }

        if policy.dlp_enabled
            && self
                .scans
                .get_scan(document_id)
                .await?
                .is_some_and(|scan| scan.requires_review())
        {
            return Ok(self.denied(document_id, DenialReason::SecurityReviewRequired));
        }

        Ok(AccessDecision::allow())
    }

    fn denied(&self, document_id: &str, reason: DenialReason) -> AccessDecision {
        metrics::counter!("policy_denials_total", "reason" => reason.as_str()).increment(1);
        tracing::debug!(document_id = %document_id, reason = reason.as_str(), "Policy denied action");
        AccessDecision::deny(reason)
    }

    /// Audit trail for a refused document action.
    pub async fn record_denial(
        &self,
        ctx: &AccessContext,
        document_id: &str,
        action: AccessAction,
        reason: &str,
    ) {
        self.audit
            .record(
                &ctx.principal_id,
                AuditAction::DocumentAccessDenied,
                format!(
                    "document_id={} action={} reason={}",
                    document_id,
                    action.as_str(),
                    reason
                ),
                ctx.ip_address.clone(),
            )
            .await;
    }

    pub async fn access_summary(&self, document_id: &str) -> Result<AccessSummary, ServiceError> {
        let events = self.events.events_for_document(document_id).await?;
        let mut by_action: HashMap<AccessAction, usize> = HashMap::new();
        let mut principals = HashSet::new();
        for event in &events {
            *by_action.entry(event.action).or_default() += 1;
            principals.insert(event.principal_id.as_str());
        }
        Ok(AccessSummary {
            document_id: document_id.to_string(),
            total_events: events.len(),
            by_action,
            unique_principals: principals.len(),
            last_accessed_at: events.iter().map(|e| e.timestamp).max(),
        })
    }
}
