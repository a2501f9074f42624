//! DLP scan results and findings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Findings grade on the same scale as the overall risk.
pub type Severity = RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Pii,
    Financial,
    Confidential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Ssn,
    CreditCard,
    EmailAddress,
    BankAccount,
    CurrencyAmount,
    Percentage,
    FinancialMetric,
    ConfidentialKeyword,
}

impl FindingType {
    pub fn category(&self) -> FindingCategory {
        match self {
            FindingType::Ssn
            | FindingType::CreditCard
            | FindingType::EmailAddress
            | FindingType::BankAccount => FindingCategory::Pii,
            FindingType::CurrencyAmount
            | FindingType::Percentage
            | FindingType::FinancialMetric => FindingCategory::Financial,
            FindingType::ConfidentialKeyword => FindingCategory::Confidential,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub finding_type: FindingType,
    pub category: FindingCategory,
    /// Masked excerpt of the match; raw sensitive values are never stored.
    pub excerpt: String,
    /// Byte offset of the match in the scanned text.
    pub offset: usize,
    pub confidence: f32,
    pub severity: Severity,
}

/// Current scan for a document. A new scan supersedes it entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlpScanResult {
    pub document_id: String,
    pub scan_date: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub findings: Vec<Finding>,
    pub approved: bool,
    pub reviewed_by: Option<String>,
}

impl DlpScanResult {
    /// True when gated actions must wait for a human reviewer.
    pub fn requires_review(&self) -> bool {
        self.risk_level == RiskLevel::Critical && !self.approved
    }
}
