//! Health Analyzer Module
//!
//! Scores a domain's DMARC health from a parsed report and its summary statistics.
//! The result is a rating, a numeric health score, and ordered lists of issues and
//! recommendations. Everything here is a pure function of its inputs.
use crate::models::{AnalysisResult, ParsedReport, PolicyType, Rating, SummaryStatistics};
use log::debug;

/// Unauthenticated sources sending more than this many messages are flagged.
pub const SUSPICIOUS_SOURCE_THRESHOLD: u64 = 10;

pub const POLICY_NONE_ISSUE: &str =
    "DMARC policy is set to \"none\" - no action taken on failures";
pub const POLICY_UPGRADE_RECOMMENDATION: &str =
    "Consider upgrading to \"quarantine\" or \"reject\" policy";
pub const REVIEW_RECOMMENDATION: &str =
    "Review failed authentication records and fix SPF/DKIM configuration";
pub const INVESTIGATE_RECOMMENDATION: &str =
    "Investigate sources with high failure counts for potential spoofing";

/// Maps a pass rate and published policy to a rating. First matching row wins.
pub fn rate_health(pass_rate: f64, policy: PolicyType) -> Rating {
    let enforcing = matches!(policy, PolicyType::Quarantine | PolicyType::Reject);
    if pass_rate >= 95.0 && enforcing {
        Rating::Excellent
    } else if pass_rate >= 90.0 && policy != PolicyType::None {
        Rating::Good
    } else if pass_rate >= 80.0 {
        Rating::Fair
    } else if pass_rate >= 60.0 {
        Rating::Poor
    } else {
        Rating::Bad
    }
}

/// Produces the health analysis for a report.
///
/// A report carrying no messages is rated `UNKNOWN`. Its pass rate is zero, so the
/// issue and recommendation checks still run against that rate.
pub fn analyze(report: &ParsedReport, stats: &SummaryStatistics) -> AnalysisResult {
    let policy = report.policy.policy;
    let rating = if stats.total_messages > 0 {
        rate_health(stats.pass_rate, policy)
    } else {
        Rating::Unknown
    };

    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if stats.pass_rate < 100.0 {
        issues.push(format!(
            "{} message(s) failed DMARC authentication",
            stats.failed_messages
        ));
    }

    if policy == PolicyType::None {
        issues.push(POLICY_NONE_ISSUE.to_string());
        recommendations.push(POLICY_UPGRADE_RECOMMENDATION.to_string());
    }

    if stats.pass_rate < 90.0 {
        recommendations.push(REVIEW_RECOMMENDATION.to_string());
    }

    let suspicious: Vec<String> = report
        .records
        .iter()
        .filter(|r| !r.passed() && r.count > SUSPICIOUS_SOURCE_THRESHOLD)
        .map(|r| format!("{} ({} messages)", r.source_ip, r.count))
        .collect();
    if !suspicious.is_empty() {
        issues.push(format!("High volume of failures from: {}", suspicious.join(", ")));
        recommendations.push(INVESTIGATE_RECOMMENDATION.to_string());
    }

    debug!(
        "{} rated {} ({} issues, {} recommendations)",
        report.policy.domain,
        rating,
        issues.len(),
        recommendations.len()
    );

    AnalysisResult {
        rating,
        tier: rating.tier(),
        rating_color: rating.color().to_string(),
        health_score: stats.pass_rate,
        issues,
        recommendations,
    }
}
