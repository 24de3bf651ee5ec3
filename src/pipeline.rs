//! Pipeline Module
//!
//! Chains the stages together: payload bytes are extracted to XML, parsed, aggregated
//! and analyzed into a single serializable result.
use crate::aggregator::aggregate;
use crate::classifier::{select_dmarc_attachment, ReportAttachment};
use crate::config::Config;
use crate::error::Result;
use crate::extractor::Extractor;
use crate::health::analyze;
use crate::models::{AnalysisResult, ParsedReport, SummaryStatistics};
use crate::xml_parser::parse_dmarc_xml;
use log::debug;
use serde::{Deserialize, Serialize};

/// A parsed report together with everything derived from it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalyzedReport {
    pub report: ParsedReport,
    pub summary: SummaryStatistics,
    pub analysis: AnalysisResult,
}

/// Aggregates and analyzes an already parsed report.
pub fn analyze_report(report: ParsedReport) -> AnalyzedReport {
    let summary = aggregate(&report);
    let analysis = analyze(&report, &summary);
    AnalyzedReport {
        report,
        summary,
        analysis,
    }
}

/// Runs the whole pipeline over one payload.
pub fn analyze_payload(
    bytes: &[u8],
    filename: &str,
    content_type: &str,
    config: &Config,
) -> Result<AnalyzedReport> {
    let xml = Extractor::new(config).extract_text(bytes, filename, content_type)?;
    let report = parse_dmarc_xml(&xml)?;
    Ok(analyze_report(report))
}

/// Selects the report among a message's attachments and analyzes it.
///
/// `Ok(None)` means no attachment looks like a DMARC report. Once an attachment is
/// selected, failures to decode or parse it are returned as errors.
pub fn analyze_attachments<A: ReportAttachment>(
    attachments: &[A],
    config: &Config,
) -> Result<Option<AnalyzedReport>> {
    let Some(selected) = select_dmarc_attachment(attachments) else {
        debug!("no report among {} attachment(s)", attachments.len());
        return Ok(None);
    };
    analyze_payload(
        selected.data(),
        selected.filename(),
        selected.content_type(),
        config,
    )
    .map(Some)
}
