//! Data Models Module
//!
//! This module defines the value objects produced by the report pipeline: the parsed
//! aggregate report (metadata, published policy, per-source records), the derived
//! summary statistics and the health analysis. Every value is built once and never
//! mutated afterwards.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const UNKNOWN: &str = "Unknown";

/// A raw attachment handed over by the mail client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ParsedReport {
    pub metadata: ReportMetadata,
    pub policy: PublishedPolicy,
    pub records: Vec<SourceRecord>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReportMetadata {
    pub org_name: String,
    pub email: String,
    pub extra_contact_info: Option<String>,
    pub report_id: String,
    pub date_range: DateRange,
    pub errors: Vec<String>,
}

impl Default for ReportMetadata {
    fn default() -> Self {
        Self {
            org_name: UNKNOWN.to_string(),
            email: String::new(),
            extra_contact_info: None,
            report_id: String::new(),
            date_range: DateRange::default(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct DateRange {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PublishedPolicy {
    pub domain: String,
    pub adkim: AlignmentMode,
    pub aspf: AlignmentMode,
    pub policy: PolicyType,
    pub subdomain_policy: PolicyType,
    /// Display only; never used to discount messages.
    pub pct: String,
    pub fo: Option<String>,
}

impl Default for PublishedPolicy {
    fn default() -> Self {
        Self {
            domain: UNKNOWN.to_string(),
            adkim: AlignmentMode::Relaxed,
            aspf: AlignmentMode::Relaxed,
            policy: PolicyType::None,
            subdomain_policy: PolicyType::None,
            pct: "100".to_string(),
            fo: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SourceRecord {
    pub source_ip: String,
    pub count: u64,
    pub policy_evaluated: PolicyEvaluated,
    pub header_from: String,
    pub envelope_from: Option<String>,
    pub envelope_to: Option<String>,
    pub dkim_auth: Vec<DkimAuthResult>,
    pub spf_auth: Vec<SpfAuthResult>,
}

impl SourceRecord {
    pub fn passed(&self) -> bool {
        self.policy_evaluated.passed()
    }

    pub fn dkim(&self) -> Verdict {
        self.policy_evaluated.dkim()
    }

    pub fn spf(&self) -> Verdict {
        self.policy_evaluated.spf()
    }

    pub fn disposition(&self) -> PolicyType {
        self.policy_evaluated.disposition()
    }
}

/// The receiver's DMARC evaluation for one row.
///
/// `passed` is derived from the DKIM and SPF verdicts when the value is built and
/// again when it is deserialized, so it can never disagree with them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(from = "EvaluatedFields")]
pub struct PolicyEvaluated {
    disposition: PolicyType,
    dkim: Verdict,
    spf: Verdict,
    passed: bool,
    reasons: Vec<PolicyOverrideReason>,
}

impl PolicyEvaluated {
    pub fn new(
        disposition: PolicyType,
        dkim: Verdict,
        spf: Verdict,
        reasons: Vec<PolicyOverrideReason>,
    ) -> Self {
        Self {
            disposition,
            dkim,
            spf,
            passed: dkim == Verdict::Pass || spf == Verdict::Pass,
            reasons,
        }
    }

    pub fn disposition(&self) -> PolicyType {
        self.disposition
    }

    pub fn dkim(&self) -> Verdict {
        self.dkim
    }

    pub fn spf(&self) -> Verdict {
        self.spf
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn reasons(&self) -> &[PolicyOverrideReason] {
        &self.reasons
    }
}

impl Default for PolicyEvaluated {
    fn default() -> Self {
        Self::new(PolicyType::None, Verdict::Fail, Verdict::Fail, Vec::new())
    }
}

#[derive(Deserialize)]
struct EvaluatedFields {
    disposition: PolicyType,
    dkim: Verdict,
    spf: Verdict,
    #[serde(default)]
    reasons: Vec<PolicyOverrideReason>,
}

impl From<EvaluatedFields> for PolicyEvaluated {
    fn from(fields: EvaluatedFields) -> Self {
        PolicyEvaluated::new(fields.disposition, fields.dkim, fields.spf, fields.reasons)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PolicyOverrideReason {
    #[serde(rename = "type")]
    pub kind: String,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DkimAuthResult {
    pub domain: String,
    pub selector: Option<String>,
    pub result: Verdict,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SpfAuthResult {
    pub domain: String,
    pub scope: Option<String>,
    pub result: Verdict,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    None,
    Pass,
    Fail,
    SoftFail,
    Neutral,
    Policy,
    TempError,
    PermError,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignmentMode {
    #[default]
    #[serde(rename = "r")]
    Relaxed,
    #[serde(rename = "s")]
    Strict,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    #[default]
    None,
    Quarantine,
    Reject,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SourceVolume {
    pub ip: String,
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SummaryStatistics {
    pub total_messages: u64,
    pub passed_messages: u64,
    pub failed_messages: u64,
    pub passed_by_dkim: u64,
    pub passed_by_spf: u64,
    pub pass_rate: f64,
    pub dkim_pass_rate: f64,
    pub spf_pass_rate: f64,
    pub record_count: usize,
    pub top_sources: Vec<SourceVolume>,
}

/// Overall authentication health. Declaration order is the ordinal rank.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rating {
    Unknown,
    Bad,
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Three-tier collapse of [`Rating`] for compact displays.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthTier {
    Unknown,
    Bad,
    Warning,
    Good,
}

impl Rating {
    pub fn tier(self) -> HealthTier {
        match self {
            Rating::Excellent | Rating::Good => HealthTier::Good,
            Rating::Fair | Rating::Poor => HealthTier::Warning,
            Rating::Bad => HealthTier::Bad,
            Rating::Unknown => HealthTier::Unknown,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Rating::Excellent | Rating::Good => "#34A853",
            Rating::Fair => "#FBBC04",
            Rating::Poor => "#FF9800",
            Rating::Bad => "#EA4335",
            Rating::Unknown => "#9E9E9E",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisResult {
    pub rating: Rating,
    pub tier: HealthTier,
    pub rating_color: String,
    pub health_score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Verdict::None => "none",
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::SoftFail => "softfail",
            Verdict::Neutral => "neutral",
            Verdict::Policy => "policy",
            Verdict::TempError => "temperror",
            Verdict::PermError => "permerror",
        };
        f.write_str(text)
    }
}
impl fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentMode::Relaxed => write!(f, "relaxed"),
            AlignmentMode::Strict => write!(f, "strict"),
        }
    }
}
impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyType::None => write!(f, "none"),
            PolicyType::Quarantine => write!(f, "quarantine"),
            PolicyType::Reject => write!(f, "reject"),
        }
    }
}
impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rating::Unknown => "UNKNOWN",
            Rating::Bad => "BAD",
            Rating::Poor => "POOR",
            Rating::Fair => "FAIR",
            Rating::Good => "GOOD",
            Rating::Excellent => "EXCELLENT",
        };
        f.write_str(text)
    }
}
impl fmt::Display for HealthTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HealthTier::Unknown => "UNKNOWN",
            HealthTier::Bad => "BAD",
            HealthTier::Warning => "WARNING",
            HealthTier::Good => "GOOD",
        };
        f.write_str(text)
    }
}
impl FromStr for Verdict {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Verdict::None),
            "pass" => Ok(Verdict::Pass),
            "fail" => Ok(Verdict::Fail),
            "softfail" => Ok(Verdict::SoftFail),
            "neutral" => Ok(Verdict::Neutral),
            "policy" => Ok(Verdict::Policy),
            "temperror" => Ok(Verdict::TempError),
            "permerror" => Ok(Verdict::PermError),
            _ => Err(format!("Invalid verdict: {}", s)),
        }
    }
}
impl FromStr for AlignmentMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "r" | "relaxed" => Ok(AlignmentMode::Relaxed),
            "s" | "strict" => Ok(AlignmentMode::Strict),
            _ => Err(format!("Invalid alignment mode: {}", s)),
        }
    }
}
impl FromStr for PolicyType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(PolicyType::None),
            "quarantine" => Ok(PolicyType::Quarantine),
            "reject" => Ok(PolicyType::Reject),
            _ => Err(format!("Invalid policy type: {}", s)),
        }
    }
}
