//! Extractor Module
//!
//! This module turns a raw report payload into XML text. The format is chosen from the
//! filename and content-type hints first, then from magic numbers on the raw bytes,
//! and finally the payload is treated as plain UTF-8 text.
use std::fmt;
use std::io::Read;
use std::path::Path;
use log::{debug, warn};
use crate::config::Config;
use crate::decompress::{gunzip, has_gzip_magic, has_zip_magic, unzip_report};
use crate::error::{DecompressError, DmarcError, Result};

const BOM: char = '\u{feff}';

/// Payload encodings a DMARC aggregate report arrives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Gzip,
    Zip,
    Xml,
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadFormat::Gzip => write!(f, "gzip"),
            PayloadFormat::Zip => write!(f, "zip"),
            PayloadFormat::Xml => write!(f, "xml"),
        }
    }
}

/// Picks a format from the filename and content-type hints alone.
///
/// Gzip is checked before zip because `application/gzip` also contains `zip`.
pub fn format_from_hints(filename: &str, content_type: &str) -> Option<PayloadFormat> {
    let name = filename.trim().to_lowercase();
    let ctype = content_type.to_lowercase();
    if name.ends_with(".gz") || name.ends_with(".gzip") || ctype.contains("gzip") {
        Some(PayloadFormat::Gzip)
    } else if name.ends_with(".zip") || ctype.contains("zip") {
        Some(PayloadFormat::Zip)
    } else if name.ends_with(".xml") || ctype.contains("xml") {
        Some(PayloadFormat::Xml)
    } else {
        None
    }
}

/// Picks a compressed format from magic numbers on the raw bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<PayloadFormat> {
    if has_gzip_magic(bytes) {
        Some(PayloadFormat::Gzip)
    } else if has_zip_magic(bytes) {
        Some(PayloadFormat::Zip)
    } else {
        None
    }
}

/// Extracts report XML from payloads, applying the limits of its configuration.
pub struct Extractor<'a> {
    config: &'a Config,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Decodes `bytes` into XML text.
    ///
    /// # Errors
    ///
    /// Returns `DmarcError::UnsupportedFormat` when the chosen decoder fails or when an
    /// unhinted payload is neither compressed nor markup.
    pub fn extract_text(&self, bytes: &[u8], filename: &str, content_type: &str) -> Result<String> {
        let text = match format_from_hints(filename, content_type) {
            Some(PayloadFormat::Gzip) => {
                if !has_gzip_magic(bytes) {
                    warn!(
                        "{} is labelled gzip but lacks the gzip magic number",
                        display_name(filename)
                    );
                }
                self.decode(PayloadFormat::Gzip, bytes).map_err(|e| {
                    if has_gzip_magic(bytes) {
                        e
                    } else {
                        mislabelled_gzip(e)
                    }
                })?
            }
            Some(PayloadFormat::Zip) => {
                if !has_zip_magic(bytes) {
                    warn!(
                        "{} is labelled zip but lacks the zip magic number",
                        display_name(filename)
                    );
                }
                self.decode(PayloadFormat::Zip, bytes)?
            }
            Some(PayloadFormat::Xml) => self.decode(PayloadFormat::Xml, bytes)?,
            None => match sniff_format(bytes) {
                Some(format) => {
                    debug!("{} sniffed as {}", display_name(filename), format);
                    self.decode(format, bytes)?
                }
                None => {
                    let text = self.decode(PayloadFormat::Xml, bytes)?;
                    if !text.trim_start().starts_with('<') {
                        return Err(DecompressError::Unrecognized.into());
                    }
                    text
                }
            },
        };
        debug!("extracted {} characters of XML from {}", text.len(), display_name(filename));
        Ok(text)
    }

    /// Reads a report file from disk and extracts its XML text, using the file name as
    /// the filename hint.
    pub fn extract_file(&self, path: &Path, content_type: &str) -> Result<String> {
        let bytes = self.read_file(path)?;
        let filename = path
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default();
        self.extract_text(&bytes, &filename, content_type)
    }

    /// Reads a file, refusing anything larger than `max_file_size`.
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > self.config.max_file_size as u64 {
            return Err(DmarcError::FileTooLarge(format!(
                "File size {} bytes exceeds limit of {} bytes",
                metadata.len(),
                self.config.max_file_size
            )));
        }
        Ok(std::fs::read(path)?)
    }

    /// Reads a payload from an arbitrary stream with the same size ceiling.
    pub fn read_stream<R: Read>(&self, reader: R) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        reader
            .take(self.config.max_file_size as u64 + 1)
            .read_to_end(&mut bytes)?;
        if bytes.len() > self.config.max_file_size {
            return Err(DmarcError::FileTooLarge(format!(
                "Input exceeds limit of {} bytes",
                self.config.max_file_size
            )));
        }
        Ok(bytes)
    }

    fn decode(
        &self,
        format: PayloadFormat,
        bytes: &[u8],
    ) -> std::result::Result<String, DecompressError> {
        let raw = match format {
            PayloadFormat::Gzip => gunzip(bytes, self.config)?,
            PayloadFormat::Zip => unzip_report(bytes, self.config)?,
            PayloadFormat::Xml => bytes.to_vec(),
        };
        let text = String::from_utf8(raw)?;
        Ok(match text.strip_prefix(BOM) {
            Some(stripped) => stripped.to_string(),
            None => text,
        })
    }
}

/// Extracts XML text using the default limits.
pub fn extract_text(bytes: &[u8], filename: &str, content_type: &str) -> Result<String> {
    Extractor::new(&Config::default()).extract_text(bytes, filename, content_type)
}

fn display_name(filename: &str) -> &str {
    if filename.is_empty() {
        "<unnamed payload>"
    } else {
        filename
    }
}

fn mislabelled_gzip(err: DecompressError) -> DecompressError {
    match err {
        DecompressError::Gzip(io) => DecompressError::Gzip(std::io::Error::new(
            io.kind(),
            format!("{} (payload does not start with the gzip magic number)", io),
        )),
        other => other,
    }
}
