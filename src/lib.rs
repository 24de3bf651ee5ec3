//! DMARC Analyzer Library
//!
//! This library ingests DMARC aggregate reports and scores the sending domain's
//! authentication health. It covers format detection and decompression, lenient XML
//! parsing, aggregation into summary statistics, rule-based health analysis, and
//! selection of the report attachment among a message's attachments.

pub mod config;
pub mod error;
pub mod models;
pub mod decompress;
pub mod extractor;
pub mod xml_parser;
pub mod aggregator;
pub mod health;
pub mod classifier;
pub mod pipeline;
pub mod webhook;

pub use aggregator::aggregate;
pub use classifier::{select_dmarc_attachment, ReportAttachment};
pub use config::Config;
pub use error::{DecompressError, DmarcError, Result};
pub use extractor::{extract_text, Extractor};
pub use health::analyze;
pub use pipeline::{analyze_attachments, analyze_payload, analyze_report, AnalyzedReport};
pub use xml_parser::parse_dmarc_xml;
