//! Visible watermarks plus a keyed trace tag that identifies who received a
//! copy and when.

use chrono::{DateTime, TimeZone, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::ServiceError;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TEMPLATE: &str = "CONFIDENTIAL - {name} <{email}> - {timestamp} - {ip}";
const TAG_KEY_INFO: &[u8] = b"trust-core/watermark-tag/v1";
const TAG_MAC_HEX_LEN: usize = 16;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[wm:(\d+):([0-9a-f]{16}):([^\]\s]+)\]").expect("watermark tag pattern is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkPosition {
    #[default]
    Header,
    Footer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkSpec {
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub position: WatermarkPosition,
    #[serde(default = "default_true")]
    pub include_trace_tag: bool,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for WatermarkSpec {
    fn default() -> Self {
        Self {
            template: default_template(),
            position: WatermarkPosition::Header,
            include_trace_tag: true,
        }
    }
}

/// Recipient details rendered into the watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientInfo {
    pub principal_id: String,
    pub name: String,
    pub email: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatermarkTag {
    pub principal_id: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Watermarker {
    tag_key: Arc<Secret<Vec<u8>>>,
}

impl Watermarker {
    /// Derives the tag key from the raw master key bytes.
    pub fn new(master_key: &[u8]) -> Result<Self, ServiceError> {
        let mut key = vec![0u8; 32];
        Hkdf::<Sha256>::new(None, master_key)
            .expand(TAG_KEY_INFO, &mut key)
            .map_err(|e| ServiceError::Encryption(format!("HKDF expansion failed: {:?}", e)))?;
        Ok(Self {
            tag_key: Arc::new(Secret::new(key)),
        })
    }

    fn mac(
        &self,
        document_id: &str,
        principal_id: &str,
        issued_unix: i64,
    ) -> Result<String, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(self.tag_key.expose_secret())
            .map_err(|e| ServiceError::Encryption(format!("Invalid key length: {}", e)))?;
        mac.update(format!("{}|{}|{}", document_id, principal_id, issued_unix).as_bytes());
        let mut digest = hex::encode(mac.finalize().into_bytes());
        digest.truncate(TAG_MAC_HEX_LEN);
        Ok(digest)
    }

    pub fn render(
        template: &str,
        document_id: &str,
        recipient: &RecipientInfo,
        at: DateTime<Utc>,
    ) -> String {
        template
            .replace("{name}", &recipient.name)
            .replace("{email}", &recipient.email)
            .replace("{ip}", recipient.ip_address.as_deref().unwrap_or("unknown"))
            .replace("{timestamp}", &at.format("%Y-%m-%d %H:%M UTC").to_string())
            .replace("{document_id}", document_id)
    }

    pub fn apply(
        &self,
        document_id: &str,
        content: &str,
        spec: &WatermarkSpec,
        recipient: &RecipientInfo,
        at: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let mut mark = Self::render(&spec.template, document_id, recipient, at);
        if spec.include_trace_tag {
            let issued = at.timestamp();
            let mac = self.mac(document_id, &recipient.principal_id, issued)?;
            mark.push_str(&format!(
                " [wm:{}:{}:{}]",
                issued, mac, recipient.principal_id
            ));
        }

        Ok(match spec.position {
            WatermarkPosition::Header => format!("{}\n{}", mark, content),
            WatermarkPosition::Footer => format!("{}\n{}", content, mark),
        })
    }

    /// Finds the first trace tag whose MAC verifies for `document_id`.
    pub fn extract_tag(&self, document_id: &str, content: &str) -> Option<WatermarkTag> {
        TAG_PATTERN.captures_iter(content).find_map(|caps| {
            let issued: i64 = caps[1].parse().ok()?;
            let principal_id = &caps[3];
            let expected = self.mac(document_id, principal_id, issued).ok()?;
            if !bool::from(expected.as_bytes().ct_eq(caps[2].as_bytes())) {
                return None;
            }
            Some(WatermarkTag {
                principal_id: principal_id.to_string(),
                issued_at: Utc.timestamp_opt(issued, 0).single()?,
            })
        })
    }
}
