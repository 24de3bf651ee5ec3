/// End-to-end tests for the report pipeline.
///
/// Reports are built in-test as raw XML, gzip and zip payloads and pushed through
/// extraction, parsing, aggregation and health analysis.
use std::io::{Cursor, Write};
use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use zip::write::SimpleFileOptions;
#[cfg(test)]
mod tests {
    use super::*;
    use dmarc_analyzer::health::rate_health;
    use dmarc_analyzer::models::{Attachment, PolicyType, Rating};
    use dmarc_analyzer::{
        aggregate, analyze_attachments, analyze_payload, extract_text, parse_dmarc_xml,
        select_dmarc_attachment, Config, DmarcError,
    };
    use tempfile::tempdir;

    const GOOGLE_REPORT: &str = "<feedback><report_metadata><org_name>Google</org_name><date_range><begin>1634256000</begin><end>1634342400</end></date_range></report_metadata><policy_published><domain>example.com</domain><p>quarantine</p><pct>100</pct></policy_published><record><row><source_ip>192.0.2.1</source_ip><count>5</count><policy_evaluated><disposition>none</disposition><dkim>pass</dkim><spf>pass</spf></policy_evaluated></row></record></feedback>";

    const MIXED_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feedback>
  <report_metadata>
    <org_name>Mail Provider</org_name>
    <email>noreply-dmarc@provider.example</email>
    <report_id>mixed-1</report_id>
    <date_range><begin>1700000000</begin><end>1700086400</end></date_range>
  </report_metadata>
  <policy_published>
    <domain>example.net</domain>
    <p>none</p>
  </policy_published>
  <record>
    <row>
      <source_ip>203.0.113.5</source_ip><count>40</count>
      <policy_evaluated><disposition>none</disposition><dkim>pass</dkim><spf>fail</spf></policy_evaluated>
    </row>
    <identifiers><header_from>example.net</header_from></identifiers>
  </record>
  <record>
    <row>
      <source_ip>198.51.100.23</source_ip><count>12</count>
      <policy_evaluated><disposition>none</disposition><dkim>fail</dkim><spf>fail</spf></policy_evaluated>
    </row>
  </record>
  <record>
    <row>
      <source_ip>203.0.113.5</source_ip><count>7</count>
      <policy_evaluated><disposition>none</disposition><dkim>fail</dkim><spf>pass</spf></policy_evaluated>
    </row>
  </record>
  <record><row><source_ip>192.0.2.8</source_ip><count>oops</count></row></record>
  <record><row><source_ip>192.0.2.9</source_ip><count>3</count></row></record>
  <record><row><source_ip>192.0.2.10</source_ip><count>2</count></row></record>
  <record><row><source_ip>192.0.2.11</source_ip><count>1</count></row></record>
</feedback>"#;

    fn gzip(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn zipped(entries: &[(&str, &str)]) -> Result<Vec<u8>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default())?;
            zip.write_all(data.as_bytes())?;
        }
        Ok(zip.finish()?.into_inner())
    }

    #[test]
    fn test_parsing_is_deterministic() -> Result<()> {
        let first = parse_dmarc_xml(MIXED_REPORT)?;
        let second = parse_dmarc_xml(MIXED_REPORT)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_totals_and_pass_invariants() -> Result<()> {
        let report = parse_dmarc_xml(MIXED_REPORT)?;
        let stats = aggregate(&report);
        let sum: u64 = report.records.iter().map(|r| r.count).sum();
        assert_eq!(stats.total_messages, sum);
        assert_eq!(stats.total_messages, 65);
        assert_eq!(stats.passed_messages + stats.failed_messages, stats.total_messages);
        assert_eq!(stats.passed_messages, 47);

        for record in &report.records {
            let expected =
                record.dkim().to_string() == "pass" || record.spf().to_string() == "pass";
            assert_eq!(record.passed(), expected, "record {}", record.source_ip);
        }
        Ok(())
    }

    #[test]
    fn test_rate_bounds() -> Result<()> {
        let stats = aggregate(&parse_dmarc_xml(MIXED_REPORT)?);
        assert!((0.0..=100.0).contains(&stats.pass_rate));
        assert_eq!(stats.pass_rate, 72.3);

        let empty = aggregate(&parse_dmarc_xml("<feedback/>")?);
        assert_eq!(empty.total_messages, 0);
        assert_eq!(empty.pass_rate, 0.0);
        Ok(())
    }

    #[test]
    fn test_top_sources_bound() -> Result<()> {
        let stats = aggregate(&parse_dmarc_xml(MIXED_REPORT)?);
        assert!(stats.top_sources.len() <= 5);
        assert!(stats
            .top_sources
            .windows(2)
            .all(|pair| pair[0].count >= pair[1].count));
        let listed: u64 = stats.top_sources.iter().map(|s| s.count).sum();
        assert!(listed <= stats.total_messages);
        assert_eq!(stats.top_sources[0].ip, "203.0.113.5");
        assert_eq!(stats.top_sources[0].count, 47);
        Ok(())
    }

    #[test]
    fn test_rating_monotonicity_under_quarantine() {
        let mut previous = Rating::Unknown;
        for rate in 50..=99 {
            let rating = rate_health(rate as f64, PolicyType::Quarantine);
            assert!(rating >= previous, "rating dropped at {}%", rate);
            previous = rating;
        }
    }

    #[test]
    fn test_missing_metadata_defaults() -> Result<()> {
        let report = parse_dmarc_xml(
            "<feedback><policy_published><domain>example.com</domain></policy_published></feedback>",
        )?;
        assert_eq!(report.metadata.org_name, "Unknown");
        assert_eq!(report.metadata.report_id, "");
        assert_eq!(report.metadata.date_range.begin.timestamp(), 0);
        Ok(())
    }

    #[test]
    fn test_classifier_prefers_report_name() {
        let candidates = vec![
            Attachment::new("invoice.pdf", "application/pdf", b"%PDF-1.4".to_vec()),
            Attachment::new(
                "weekly-dmarc-report.xml",
                "text/xml",
                GOOGLE_REPORT.as_bytes().to_vec(),
            ),
        ];
        let selected = select_dmarc_attachment(&candidates);
        assert_eq!(
            selected.map(|a| a.filename.as_str()),
            Some("weekly-dmarc-report.xml")
        );
    }

    #[test]
    fn test_gzip_report_end_to_end() -> Result<()> {
        let payload = gzip(GOOGLE_REPORT.as_bytes())?;
        let result = analyze_payload(&payload, "report.xml.gz", "", &Config::default())?;
        assert_eq!(result.report.policy.domain, "example.com");
        assert_eq!(result.report.metadata.org_name, "Google");
        assert_eq!(result.report.metadata.date_range.begin.timestamp(), 1634256000);
        assert_eq!(result.summary.total_messages, 5);
        assert_eq!(result.summary.passed_messages, 5);
        assert_eq!(result.summary.pass_rate, 100.0);
        assert_eq!(result.analysis.rating, Rating::Excellent);
        assert_eq!(result.analysis.rating.to_string(), "EXCELLENT");
        Ok(())
    }

    #[test]
    fn test_zip_attachment_end_to_end() -> Result<()> {
        let payload = zipped(&[("readme.txt", "see attached"), ("report.xml", MIXED_REPORT)])?;
        let attachments = vec![
            Attachment::new("logo.png", "image/png", vec![0x89, b'P', b'N', b'G']),
            Attachment::new(
                "provider.example!example.net!1700000000!1700086400.zip",
                "application/zip",
                payload,
            ),
        ];
        let result =
            analyze_attachments(&attachments, &Config::default())?.expect("report selected");
        assert_eq!(result.report.policy.domain, "example.net");
        assert_eq!(result.analysis.rating, Rating::Poor);
        assert_eq!(
            result.analysis.issues,
            vec![
                "18 message(s) failed DMARC authentication".to_string(),
                "DMARC policy is set to \"none\" - no action taken on failures".to_string(),
                "High volume of failures from: 198.51.100.23 (12 messages)".to_string(),
            ]
        );
        assert_eq!(result.analysis.recommendations.len(), 3);
        Ok(())
    }

    #[test]
    fn test_report_file_on_disk() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("google.com!example.com!1634256000!1634342400.xml.gz");
        std::fs::write(&path, gzip(GOOGLE_REPORT.as_bytes())?)?;
        let config = Config::default();
        let xml = dmarc_analyzer::Extractor::new(&config).extract_file(&path, "")?;
        assert_eq!(xml, GOOGLE_REPORT);
        Ok(())
    }

    #[test]
    fn test_truncated_xml_is_malformed() {
        let truncated = &GOOGLE_REPORT[..GOOGLE_REPORT.len() / 2];
        assert!(matches!(
            parse_dmarc_xml(truncated),
            Err(DmarcError::MalformedReport { .. })
        ));
        assert!(matches!(
            analyze_payload(truncated.as_bytes(), "report.xml", "", &Config::default()),
            Err(DmarcError::MalformedReport { .. })
        ));
    }

    #[test]
    fn test_unrecognized_bytes_are_unsupported() {
        let noise: Vec<u8> = (0u8..=255).rev().cycle().take(1024).collect();
        assert!(matches!(
            extract_text(&noise, "attachment", ""),
            Err(DmarcError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            analyze_payload(b"hello, world", "attachment.dat", "", &Config::default()),
            Err(DmarcError::UnsupportedFormat(_))
        ));
    }
}
