//! Document access events - the append-only ledger behind analytics and
//! rate-limit windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessAction {
    View,
    Download,
    Print,
    Share,
    Edit,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::View => "view",
            AccessAction::Download => "download",
            AccessAction::Print => "print",
            AccessAction::Share => "share",
            AccessAction::Edit => "edit",
        }
    }

    /// RBAC action guarding this kind of access.
    pub fn required_permission(&self) -> Action {
        match self {
            AccessAction::View => Action::View,
            AccessAction::Download => Action::Download,
            AccessAction::Print => Action::Print,
            AccessAction::Share => Action::Share,
            AccessAction::Edit => Action::Edit,
        }
    }
}

/// Who is touching a document and from where.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessContext {
    pub principal_id: String,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAccessEvent {
    pub id: String,
    pub document_id: String,
    pub principal_id: String,
    pub action: AccessAction,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

impl DocumentAccessEvent {
    pub fn new(
        document_id: &str,
        action: AccessAction,
        ctx: &AccessContext,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            principal_id: ctx.principal_id.clone(),
            action,
            timestamp,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            session_id: ctx.session_id.clone(),
        }
    }
}

/// Per-document access analytics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccessSummary {
    pub document_id: String,
    pub total_events: usize,
    pub by_action: HashMap<AccessAction, usize>,
    pub unique_principals: usize,
    pub last_accessed_at: Option<DateTime<Utc>>,
}
