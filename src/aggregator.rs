//! Aggregator Module
//!
//! Folds the records of a parsed report into summary statistics: totals, DMARC pass and
//! fail counts, per-mechanism pass counts, rates rounded to one decimal place, and the
//! busiest sending sources.

use crate::models::{ParsedReport, SourceVolume, SummaryStatistics, Verdict};
use std::collections::HashMap;

pub const TOP_SOURCES: usize = 5;

/// Computes summary statistics for a report. Never fails.
pub fn aggregate(report: &ParsedReport) -> SummaryStatistics {
    let mut total: u64 = 0;
    let mut passed: u64 = 0;
    let mut passed_by_dkim: u64 = 0;
    let mut passed_by_spf: u64 = 0;

    for record in &report.records {
        // Counts come straight from the report, so sums saturate instead of wrapping.
        total = total.saturating_add(record.count);
        if record.dkim() == Verdict::Pass {
            passed_by_dkim = passed_by_dkim.saturating_add(record.count);
        }
        if record.spf() == Verdict::Pass {
            passed_by_spf = passed_by_spf.saturating_add(record.count);
        }
        // Counted once even when both mechanisms pass.
        if record.passed() {
            passed = passed.saturating_add(record.count);
        }
    }

    SummaryStatistics {
        total_messages: total,
        passed_messages: passed,
        failed_messages: total.saturating_sub(passed),
        passed_by_dkim,
        passed_by_spf,
        pass_rate: rate(passed, total),
        dkim_pass_rate: rate(passed_by_dkim, total),
        spf_pass_rate: rate(passed_by_spf, total),
        record_count: report.records.len(),
        top_sources: top_sources(report, TOP_SOURCES),
    }
}

/// Percentage of `part` in `total`, rounded half away from zero to one decimal place.
/// Zero when `total` is zero.
///
/// The rounding is done on integer tenths so exact ties such as 28.75 go up.
pub fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let (part, total) = (u128::from(part), u128::from(total));
    let tenths = (part * 2000 + total) / (2 * total);
    tenths as f64 / 10.0
}

/// Sums counts per source IP and returns the `limit` busiest, busiest first. Ties keep
/// the order in which the IPs first appear in the report.
pub fn top_sources(report: &ParsedReport, limit: usize) -> Vec<SourceVolume> {
    let mut volumes: Vec<SourceVolume> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in &report.records {
        let existing = index.get(record.source_ip.as_str()).copied();
        match existing {
            Some(i) => volumes[i].count = volumes[i].count.saturating_add(record.count),
            None => {
                index.insert(record.source_ip.as_str(), volumes.len());
                volumes.push(SourceVolume {
                    ip: record.source_ip.clone(),
                    count: record.count,
                });
            }
        }
    }

    // sort_by is stable, which keeps first-seen order among equal counts.
    volumes.sort_by(|a, b| b.count.cmp(&a.count));
    volumes.truncate(limit);
    volumes
}
