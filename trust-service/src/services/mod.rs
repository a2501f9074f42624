pub mod audit;
pub mod clock;
pub mod crypto;
pub mod dlp;
pub mod document_security;
pub mod error;
pub mod metrics;
pub mod mfa;
pub mod notifier;
pub mod rbac;
pub mod session;
pub mod store;
pub mod totp;
pub mod versioning;
pub mod watermark;

pub use audit::{AlertSink, AuditGateway, TracingAlertSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crate::models::DocumentPolicy;
pub use document_security::{AccessDecision, DenialReason, DocumentSecurityService};
pub use error::{ErrorKind, ServiceError};
pub use mfa::MfaService;
pub use notifier::{ChallengeDispatcher, LogDispatcher, MockDispatcher};
pub use rbac::RbacService;
pub use session::SessionManager;
pub use versioning::{VersionDraft, VersionService};

/// The principal performing a mutation, as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub ip_address: Option<String>,
    /// Set only from a session validated for `id`.
    pub session_id: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ip_address: None,
            session_id: None,
        }
    }

    pub fn with_ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}
