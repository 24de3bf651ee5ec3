//! Error Handling Module
//!
//! This module defines the error types for the report pipeline using the `thiserror` crate.
//! Decompression failures are kept as a typed cause underneath `UnsupportedFormat`; XML
//! failures surface as `MalformedReport`. Missing optional fields never produce an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmarcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported report format: {0}")]
    UnsupportedFormat(#[from] DecompressError),

    #[error("Malformed report: {reason}")]
    MalformedReport {
        reason: String,
        #[source]
        source: Option<quick_xml::Error>,
    },

    #[error("File too large: {0}")]
    FileTooLarge(String),
}

impl DmarcError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DmarcError::MalformedReport {
            reason: reason.into(),
            source: None,
        }
    }

    /// Stable tag for machine-readable error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DmarcError::Io(_) => "io",
            DmarcError::UnsupportedFormat(_) => "unsupported_format",
            DmarcError::MalformedReport { .. } => "malformed_report",
            DmarcError::FileTooLarge(_) => "file_too_large",
        }
    }
}

impl From<quick_xml::Error> for DmarcError {
    fn from(err: quick_xml::Error) -> Self {
        DmarcError::MalformedReport {
            reason: err.to_string(),
            source: Some(err),
        }
    }
}

/// Why a payload could not be turned into XML text.
#[derive(Error, Debug)]
pub enum DecompressError {
    #[error("invalid gzip stream: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("zip archive contains no files")]
    EmptyArchive,

    #[error("{0}")]
    LimitExceeded(String),

    #[error("{0}")]
    SuspiciousArchive(String),

    #[error("payload is neither gzip, zip nor XML")]
    Unrecognized,
}

pub type Result<T> = std::result::Result<T, DmarcError>;
