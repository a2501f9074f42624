use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{AccessAction, AuditAction, AuditQuery, LockType};
use crate::services::watermark::WatermarkSpec;

#[derive(Debug, Deserialize, Validate)]
pub struct ScanRequest {
    #[validate(length(min = 1, max = 5_000_000, message = "Content is required"))]
    pub content: String,
}

/// The policy is never taken from the caller; the stored one applies.
#[derive(Debug, Deserialize)]
pub struct AccessRequest {
    pub action: AccessAction,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WatermarkRequest {
    #[validate(length(min = 1, message = "Content is required"))]
    pub content: String,
    #[serde(default)]
    pub spec: WatermarkSpec,
}

#[derive(Debug, Serialize)]
pub struct WatermarkResponse {
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExtractWatermarkRequest {
    #[validate(length(min = 1, message = "Content is required"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LockRequest {
    pub lock_type: LockType,
    #[validate(range(min = 1, max = 1440, message = "ttl_minutes must be between 1 and 1440"))]
    pub ttl_minutes: Option<i64>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseLockQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateVersionRequest {
    #[validate(length(min = 1, max = 300, message = "Title is required"))]
    pub title: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub content: String,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentQuery {
    #[serde(default)]
    pub watermark: bool,
}

#[derive(Debug, Serialize)]
pub struct VersionContentResponse {
    pub version_id: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ApproveRequest {
    #[validate(length(max = 2000))]
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub principal_id: Option<String>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl From<AuditQueryParams> for AuditQuery {
    fn from(params: AuditQueryParams) -> Self {
        AuditQuery {
            principal_id: params.principal_id,
            action: params.action,
            from: params.from,
            to: params.to,
            limit: Some(params.limit.unwrap_or(500).min(5000)),
        }
    }
}
