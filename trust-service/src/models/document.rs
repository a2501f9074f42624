//! Document versions, locks and the encrypted content envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Draft,
    Pending,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub approver_id: String,
    pub comments: Option<String>,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    pub version_number: u32,
    pub title: String,
    pub content_type: String,
    pub content_sha256: String,
    pub size_bytes: u64,
    pub created_by: String,
    pub parent_version_id: Option<String>,
    pub status: VersionStatus,
    pub approval: Option<Approval>,
    pub created_at: DateTime<Utc>,
}

/// Version payload handed to the store, which assigns id, number and parent.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub title: String,
    pub content_type: String,
    pub content_sha256: String,
    pub size_bytes: u64,
    pub created_by: String,
    pub content: EncryptedContent,
    pub created_at: DateTime<Utc>,
}

/// AES-256-GCM envelope; the document id is bound as associated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedContent {
    pub key_version: u32,
    /// Base64 nonce
    pub nonce: String,
    /// Base64 ciphertext including the authentication tag
    pub ciphertext: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    Edit,
    Review,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLock {
    pub document_id: String,
    pub holder_id: String,
    pub lock_type: LockType,
    pub reason: Option<String>,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DocumentLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_held_by(&self, principal_id: &str, now: DateTime<Utc>) -> bool {
        self.holder_id == principal_id && !self.is_expired(now)
    }
}

/// Per-document restrictions set by a document manager and evaluated before
/// every gated action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPolicy {
    #[serde(default)]
    pub download_restrictions: bool,
    /// Downloads allowed per principal in a trailing 24 hour window.
    #[serde(default)]
    pub max_downloads_per_day: Option<u32>,
    #[serde(default)]
    pub print_restrictions: bool,
    #[serde(default = "default_dlp_enabled")]
    pub dlp_enabled: bool,
    #[serde(default)]
    pub access_expires_at: Option<DateTime<Utc>>,
}

fn default_dlp_enabled() -> bool {
    true
}

impl Default for DocumentPolicy {
    fn default() -> Self {
        Self {
            download_restrictions: false,
            max_downloads_per_day: None,
            print_restrictions: false,
            dlp_enabled: default_dlp_enabled(),
            access_expires_at: None,
        }
    }
}
