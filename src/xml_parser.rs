//! XML Parser Module
//!
//! This module parses DMARC aggregate report XML into a [`ParsedReport`]. The document is
//! read with `quick-xml` into a small element tree and then walked with lenient, null-safe
//! lookups: any missing element falls back to its documented default, and only XML that is
//! not well-formed (or has no root element) is rejected.
//!
//! The reader enforces a nesting depth limit, never expands entities, and rejects a DOCTYPE
//! that declares two or more entities (Billion Laughs).

use crate::error::{DmarcError, Result};
use crate::models::{
    AlignmentMode, DateRange, DkimAuthResult, ParsedReport, PolicyEvaluated, PolicyOverrideReason,
    PolicyType, PublishedPolicy, ReportMetadata, SourceRecord, SpfAuthResult, Verdict, UNKNOWN,
};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

const MAX_DEPTH: usize = 20; // Prevent excessive recursion

/// Parses the DMARC XML content into a structured report.
///
/// # Errors
///
/// Returns `DmarcError::MalformedReport` if the XML is not well-formed, has no root
/// element, nests deeper than the depth limit, or declares two or more entities in its
/// DOCTYPE. Missing report fields never cause an error.
pub fn parse_dmarc_xml(xml_content: &str) -> Result<ParsedReport> {
    let root = read_tree(xml_content)?;
    if root.name != "feedback" {
        debug!("unexpected root element <{}>, parsing anyway", root.name);
    }

    let metadata = parse_report_metadata(root.child("report_metadata"));
    let policy = parse_policy_published(root.child("policy_published"));
    let records: Vec<SourceRecord> = root.children("record").map(parse_record).collect();
    debug!(
        "parsed report {} from {} for {} with {} record(s)",
        metadata.report_id,
        metadata.org_name,
        policy.domain,
        records.len()
    );

    Ok(ParsedReport {
        metadata,
        policy,
        records,
    })
}

/// Minimal element tree: name, concatenated text and child elements.
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(start: &BytesStart<'_>) -> Self {
        Element {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

/// Trimmed text of `parent/name`; `None` when either is missing or the text is empty.
fn text_of<'a>(parent: Option<&'a Element>, name: &str) -> Option<&'a str> {
    parent
        .and_then(|p| p.child(name))
        .map(|c| c.text.trim())
        .filter(|t| !t.is_empty())
}

fn string_or(parent: Option<&Element>, name: &str, default: &str) -> String {
    text_of(parent, name).unwrap_or(default).to_string()
}

fn optional(parent: Option<&Element>, name: &str) -> Option<String> {
    text_of(parent, name).map(str::to_string)
}

fn read_tree(xml_content: &str) -> Result<Element> {
    let content = xml_content.trim_start_matches('\u{feff}').trim();
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if stack.is_empty() && root.is_some() {
                    return Err(DmarcError::malformed("content after the root element"));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(DmarcError::malformed("XML recursion depth limit exceeded"));
                }
                stack.push(Element::new(e));
            }
            Ok(Event::Empty(ref e)) => {
                close_element(&mut stack, &mut root, Element::new(e))?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DmarcError::malformed("unmatched closing tag"))?;
                close_element(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape()?;
                push_text(&mut stack, &text)?;
            }
            Ok(Event::CData(e)) => {
                let bytes = e.into_inner();
                push_text(&mut stack, &String::from_utf8_lossy(&bytes))?;
            }
            Ok(Event::DocType(ref e)) => {
                let doctype = String::from_utf8_lossy(e);
                if doctype.matches("<!ENTITY").count() >= 2 {
                    return Err(DmarcError::malformed("Recursive entities detected"));
                }
                trace!("ignoring DOCTYPE declaration");
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => (),
        }
    }

    if let Some(open) = stack.last() {
        return Err(DmarcError::malformed(format!(
            "unexpected end of document inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| DmarcError::malformed("document has no root element"))
}

fn close_element(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(DmarcError::malformed("multiple root elements")),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<()> {
    match stack.last_mut() {
        Some(element) => element.text.push_str(text),
        None if text.trim().is_empty() => {}
        None => return Err(DmarcError::malformed("text outside the root element")),
    }
    Ok(())
}

/// Parses the `<report_metadata>` element.
fn parse_report_metadata(metadata: Option<&Element>) -> ReportMetadata {
    let date_range = metadata.and_then(|m| m.child("date_range"));
    ReportMetadata {
        org_name: string_or(metadata, "org_name", UNKNOWN),
        email: string_or(metadata, "email", ""),
        extra_contact_info: optional(metadata, "extra_contact_info"),
        report_id: string_or(metadata, "report_id", ""),
        date_range: DateRange {
            begin: epoch_seconds(text_of(date_range, "begin")),
            end: epoch_seconds(text_of(date_range, "end")),
        },
        errors: metadata
            .map(|m| {
                m.children("error")
                    .map(|e| e.text.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Converts an epoch-seconds string into an instant; anything unusable is the epoch.
fn epoch_seconds(text: Option<&str>) -> DateTime<Utc> {
    text.and_then(|t| t.parse::<i64>().ok())
        .and_then(|secs| secs.checked_mul(1000))
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
}

/// Parses the `<policy_published>` element.
fn parse_policy_published(policy: Option<&Element>) -> PublishedPolicy {
    let p = text_of(policy, "p").map(parse_policy_type).unwrap_or_default();
    PublishedPolicy {
        domain: string_or(policy, "domain", UNKNOWN),
        adkim: text_of(policy, "adkim").map(parse_alignment).unwrap_or_default(),
        aspf: text_of(policy, "aspf").map(parse_alignment).unwrap_or_default(),
        policy: p,
        subdomain_policy: text_of(policy, "sp").map(parse_policy_type).unwrap_or(p),
        pct: string_or(policy, "pct", "100"),
        fo: optional(policy, "fo"),
    }
}

fn parse_policy_type(text: &str) -> PolicyType {
    text.parse().unwrap_or(PolicyType::None)
}

fn parse_alignment(text: &str) -> AlignmentMode {
    if text.to_lowercase().starts_with('s') {
        AlignmentMode::Strict
    } else {
        AlignmentMode::Relaxed
    }
}

/// Parses one `<record>` element.
fn parse_record(record: &Element) -> SourceRecord {
    let row = record.child("row");
    let evaluated = row.and_then(|r| r.child("policy_evaluated"));
    let identifiers = record.child("identifiers");
    let auth_results = record.child("auth_results");

    let reasons = evaluated
        .map(|pe| pe.children("reason").map(parse_reason).collect())
        .unwrap_or_default();
    let policy_evaluated = PolicyEvaluated::new(
        text_of(evaluated, "disposition").map(parse_policy_type).unwrap_or_default(),
        evaluated_verdict(text_of(evaluated, "dkim")),
        evaluated_verdict(text_of(evaluated, "spf")),
        reasons,
    );

    SourceRecord {
        source_ip: string_or(row, "source_ip", UNKNOWN),
        count: text_of(row, "count").and_then(|c| c.parse().ok()).unwrap_or(0),
        policy_evaluated,
        header_from: string_or(identifiers, "header_from", ""),
        envelope_from: optional(identifiers, "envelope_from"),
        envelope_to: optional(identifiers, "envelope_to"),
        dkim_auth: auth_results
            .map(|a| a.children("dkim").map(parse_dkim).collect())
            .unwrap_or_default(),
        spf_auth: auth_results
            .map(|a| a.children("spf").map(parse_spf).collect())
            .unwrap_or_default(),
    }
}

/// Missing or unrecognized evaluation results count as failures.
fn evaluated_verdict(text: Option<&str>) -> Verdict {
    text.and_then(|t| t.parse().ok()).unwrap_or(Verdict::Fail)
}

fn auth_verdict(text: Option<&str>) -> Verdict {
    text.and_then(|t| t.parse().ok()).unwrap_or(Verdict::None)
}

/// Parses a `<policy_evaluated><reason>` element.
fn parse_reason(reason: &Element) -> PolicyOverrideReason {
    let reason = Some(reason);
    PolicyOverrideReason {
        kind: string_or(reason, "type", "other"),
        comment: optional(reason, "comment"),
    }
}

/// Parses an `<auth_results><dkim>` element.
fn parse_dkim(dkim: &Element) -> DkimAuthResult {
    let dkim = Some(dkim);
    DkimAuthResult {
        domain: string_or(dkim, "domain", ""),
        selector: optional(dkim, "selector"),
        result: auth_verdict(text_of(dkim, "result")),
    }
}

/// Parses an `<auth_results><spf>` element.
fn parse_spf(spf: &Element) -> SpfAuthResult {
    let spf = Some(spf);
    SpfAuthResult {
        domain: string_or(spf, "domain", ""),
        scope: optional(spf, "scope"),
        result: auth_verdict(text_of(spf, "result")),
    }
}
