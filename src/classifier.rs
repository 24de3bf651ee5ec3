//! Attachment Classifier Module
//!
//! Picks the attachment of a message most likely to be a DMARC aggregate report,
//! using filename patterns first and byte-level sniffing as a fallback.
use crate::decompress::{has_gzip_magic, has_zip_magic};
use crate::models::Attachment;
use log::debug;

const REPORT_EXTENSIONS: [&str; 4] = [".xml", ".gz", ".gzip", ".zip"];
const NAME_MARKERS: [&str; 3] = ["dmarc", "!", "rua"];
const CONTENT_MARKERS: [&str; 4] = ["<?xml", "<feedback", "report_metadata", "policy_published"];
const SNIFF_LEN: usize = 500;

/// Read access to a mail attachment. Implement this for a mail client's own
/// attachment type to classify it without copying the payload.
pub trait ReportAttachment {
    fn filename(&self) -> &str;
    fn content_type(&self) -> &str;
    fn data(&self) -> &[u8];
}

impl ReportAttachment for Attachment {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

impl<T: ReportAttachment + ?Sized> ReportAttachment for &T {
    fn filename(&self) -> &str {
        (**self).filename()
    }

    fn content_type(&self) -> &str {
        (**self).content_type()
    }

    fn data(&self) -> &[u8] {
        (**self).data()
    }
}

/// Returns the first candidate that looks like a DMARC report, or `None`.
///
/// A candidate with a report extension wins when its name carries a DMARC marker or
/// its content passes the sniff check. Only if no candidate qualifies that way is the
/// content check tried on its own.
pub fn select_dmarc_attachment<A: ReportAttachment>(candidates: &[A]) -> Option<&A> {
    let by_name = candidates.iter().find(|candidate| {
        let name = candidate.filename().to_lowercase();
        has_report_extension(&name)
            && (NAME_MARKERS.iter().any(|m| name.contains(m))
                || looks_like_report(candidate.data()))
    });
    if let Some(found) = by_name {
        debug!("selected attachment {} by name", found.filename());
        return Some(found);
    }

    let by_content = candidates.iter().find(|c| looks_like_report(c.data()));
    match by_content {
        Some(found) => debug!("selected attachment {} by content", found.filename()),
        None => debug!("no DMARC report among {} attachment(s)", candidates.len()),
    }
    by_content
}

fn has_report_extension(lowercase_name: &str) -> bool {
    REPORT_EXTENSIONS.iter().any(|ext| lowercase_name.ends_with(ext))
}

/// Compressed payloads are accepted on their magic number alone; text payloads must
/// show a report marker near the start.
pub fn looks_like_report(data: &[u8]) -> bool {
    if has_gzip_magic(data) || has_zip_magic(data) {
        return true;
    }
    let head = String::from_utf8_lossy(&data[..data.len().min(SNIFF_LEN)]);
    CONTENT_MARKERS.iter().any(|marker| head.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &[u8] = b"<?xml version=\"1.0\"?><feedback><report_metadata/></feedback>";

    fn attachment(name: &str, data: &[u8]) -> Attachment {
        Attachment::new(name, "application/octet-stream", data.to_vec())
    }

    #[test]
    fn test_named_report_beats_other_files() {
        let candidates = vec![
            attachment("invoice.pdf", b"%PDF-1.7"),
            attachment("weekly-dmarc-report.xml", b"not inspected"),
        ];
        let selected = select_dmarc_attachment(&candidates).unwrap();
        assert_eq!(selected.filename, "weekly-dmarc-report.xml");
    }

    #[test]
    fn test_google_style_names() {
        let candidates = vec![attachment(
            "google.com!example.com!1634256000!1634342400.zip",
            b"no magic",
        )];
        assert!(select_dmarc_attachment(&candidates).is_some());

        let candidates = vec![attachment("RUA_Report.XML.GZ", b"")];
        assert!(select_dmarc_attachment(&candidates).is_some());
    }

    #[test]
    fn test_extension_without_marker_needs_content() {
        let candidates = vec![attachment("notes.xml", b"<notes>hello</notes>")];
        assert!(select_dmarc_attachment(&candidates).is_none());

        let candidates = vec![attachment("report.xml", REPORT)];
        assert!(select_dmarc_attachment(&candidates).is_some());
    }

    #[test]
    fn test_marker_without_extension_is_not_enough() {
        let candidates = vec![attachment("dmarc-summary.pdf", b"%PDF-1.7")];
        assert!(select_dmarc_attachment(&candidates).is_none());
    }

    #[test]
    fn test_content_fallback() {
        let candidates = vec![
            attachment("scan.pdf", b"%PDF-1.7"),
            attachment("attachment.bin", &[0x1f, 0x8b, 0x08, 0x00]),
        ];
        let selected = select_dmarc_attachment(&candidates).unwrap();
        assert_eq!(selected.filename, "attachment.bin");
    }

    #[test]
    fn test_name_pass_runs_before_content_pass() {
        let candidates = vec![
            attachment("blob", REPORT),
            attachment("example.com!report.xml", b""),
        ];
        let selected = select_dmarc_attachment(&candidates).unwrap();
        assert_eq!(selected.filename, "example.com!report.xml");
    }

    #[test]
    fn test_sniffing_only_looks_at_the_head() {
        let mut data = vec![b' '; SNIFF_LEN];
        data.extend_from_slice(b"<feedback>");
        assert!(!looks_like_report(&data));
        assert!(looks_like_report(b"  <feedback>"));
    }

    #[test]
    fn test_no_candidates() {
        let candidates: Vec<Attachment> = Vec::new();
        assert!(select_dmarc_attachment(&candidates).is_none());
    }
}
