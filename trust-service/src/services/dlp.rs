//! DLP content scanner: a fixed battery of pattern detectors and the risk
//! aggregation over their findings.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

use crate::models::{DlpScanResult, Finding, FindingType, RiskLevel};

struct Detector {
    finding_type: FindingType,
    pattern: Regex,
    severity: RiskLevel,
    confidence: f32,
    /// Narrows a raw match to the spans that are real findings.
    locate: Option<fn(&str) -> Vec<Range<usize>>>,
}

impl Detector {
    fn new(finding_type: FindingType, pattern: &str, severity: RiskLevel, confidence: f32) -> Self {
        Self {
            finding_type,
            pattern: Regex::new(pattern).expect("detector pattern is valid"),
            severity,
            confidence,
            locate: None,
        }
    }

    fn located(mut self, locate: fn(&str) -> Vec<Range<usize>>) -> Self {
        self.locate = Some(locate);
        self
    }
}

static DETECTORS: Lazy<Vec<Detector>> = Lazy::new(|| {
    vec![
        Detector::new(
            FindingType::Ssn,
            r"\b\d{3}-\d{2}-\d{4}\b",
            RiskLevel::Critical,
            0.95,
        ),
        Detector::new(
            FindingType::CreditCard,
            r"\b[0-9]+(?:[ -][0-9]+)*\b",
            RiskLevel::Critical,
            0.9,
        )
        .located(card_spans),
        Detector::new(
            FindingType::EmailAddress,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            RiskLevel::Medium,
            0.85,
        ),
        Detector::new(
            FindingType::BankAccount,
            r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b|(?i)\baccount\s*(?:number|no\.?|#)\s*:?\s*\d{6,17}\b",
            RiskLevel::High,
            0.75,
        ),
        Detector::new(
            FindingType::CurrencyAmount,
            r"[$€£]\s?\d{1,3}(?:,\d{3})*(?:\.\d+)?(?:\s?(?:[KMB]\b|million|billion))?|\b\d+(?:\.\d+)?\s?(?:USD|EUR|GBP)\b",
            RiskLevel::Medium,
            0.7,
        ),
        Detector::new(
            FindingType::Percentage,
            r"\b\d+(?:\.\d+)?\s?%",
            RiskLevel::Low,
            0.5,
        ),
        Detector::new(
            FindingType::FinancialMetric,
            r"(?i)\b(?:EBITDA|revenue|net income|gross margin|IRR|MOIC|valuation|cash flow|ARR)\b",
            RiskLevel::Medium,
            0.6,
        ),
        Detector::new(
            FindingType::ConfidentialKeyword,
            r"(?i)\b(?:confidential|proprietary|trade secret|internal only|do not distribute|privileged)\b",
            RiskLevel::High,
            0.8,
        ),
    ]
});

/// Luhn checksum over the digits of `candidate`; separators are ignored.
pub fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

static DIGIT_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+").expect("digit group pattern is valid"));

/// Luhn-valid 13 to 19 digit windows inside a run of separated digit groups.
/// Windows start and end on group boundaries, so neighbouring numbers never
/// merge into a card number.
pub fn card_spans(run: &str) -> Vec<Range<usize>> {
    let groups: Vec<Range<usize>> = DIGIT_GROUP.find_iter(run).map(|m| m.range()).collect();
    let mut spans = Vec::new();
    let mut start = 0;
    'windows: while start < groups.len() {
        let mut digits = 0;
        for end in start..groups.len() {
            digits += groups[end].len();
            if digits > 19 {
                break;
            }
            let span = groups[start].start..groups[end].end;
            if digits >= 13 && luhn_valid(&run[span.clone()]) {
                spans.push(span);
                start = end + 1;
                continue 'windows;
            }
        }
        start += 1;
    }
    spans
}

/// Masks personal data so findings never carry the raw value.
pub fn mask_excerpt(finding_type: FindingType, raw: &str) -> String {
    match finding_type {
        FindingType::Ssn | FindingType::CreditCard | FindingType::BankAccount => {
            let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            let keep = digits.len().min(4);
            let tail: String = digits[digits.len() - keep..].iter().collect();
            format!("{}{}", "*".repeat(digits.len() - keep), tail)
        }
        FindingType::EmailAddress => match raw.split_once('@') {
            Some((local, domain)) => {
                let first = local.chars().next().unwrap_or('*');
                format!("{}***@{}", first, domain)
            }
            None => "***".to_string(),
        },
        _ => raw.to_string(),
    }
}

/// Overall risk from individual findings.
pub fn aggregate_risk(findings: &[Finding]) -> RiskLevel {
    let count = |level: RiskLevel| findings.iter().filter(|f| f.severity == level).count();
    let high = count(RiskLevel::High);
    let medium = count(RiskLevel::Medium);

    if count(RiskLevel::Critical) > 0 {
        RiskLevel::Critical
    } else if high > 2 {
        RiskLevel::High
    } else if high >= 1 || medium > 3 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn scan_text(document_id: &str, text: &str, now: DateTime<Utc>) -> DlpScanResult {
    let mut findings = Vec::new();
    for detector in DETECTORS.iter() {
        for m in detector.pattern.find_iter(text) {
            let spans = match detector.locate {
                Some(locate) => locate(m.as_str()),
                None => vec![0..m.len()],
            };
            for span in spans {
                findings.push(Finding {
                    finding_type: detector.finding_type,
                    category: detector.finding_type.category(),
                    excerpt: mask_excerpt(detector.finding_type, m.as_str()[span.clone()].trim()),
                    offset: m.start() + span.start,
                    confidence: detector.confidence,
                    severity: detector.severity,
                });
            }
        }
    }
    findings.sort_by_key(|f| f.offset);

    let risk_level = aggregate_risk(&findings);
    DlpScanResult {
        document_id: document_id.to_string(),
        scan_date: now,
        risk_level,
        findings,
        approved: risk_level == RiskLevel::Low,
        reviewed_by: None,
    }
}
