//! Decompression Module
//!
//! This module decodes gzip and zip payloads held in memory. It enforces the same
//! security measures for both: a ceiling on decompressed size and, for zip archives,
//! limits on entry count, compression ratio, entry name length, and rejection of
//! path-traversal entry names.
use std::io::{Cursor, Read};
use flate2::read::GzDecoder;
use log::{debug, trace};
use zip::ZipArchive;
use crate::config::Config;
use crate::error::DecompressError;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
pub const ZIP_MAGIC: [u8; 2] = [0x50, 0x4b];

/// True when the payload starts with the gzip magic number.
pub fn has_gzip_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// True when the payload starts with the zip local-header magic number.
pub fn has_zip_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(&ZIP_MAGIC)
}

/// Inflates a gzip payload.
pub fn gunzip(bytes: &[u8], config: &Config) -> Result<Vec<u8>, DecompressError> {
    let decoder = GzDecoder::new(bytes);
    let contents = read_limited(decoder, config.max_decompressed_size)
        .map_err(DecompressError::Gzip)?;
    check_size(&contents, config)?;
    trace!("gzip payload inflated to {} bytes", contents.len());
    Ok(contents)
}

/// Extracts the report member from a zip payload.
///
/// The first entry whose name ends in `.xml` wins; otherwise the first regular file
/// in the archive is used. Directories are skipped.
pub fn unzip_report(bytes: &[u8], config: &Config) -> Result<Vec<u8>, DecompressError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    if archive.len() > config.max_files_in_zip {
        return Err(DecompressError::SuspiciousArchive(format!(
            "Too many files in archive ({})",
            archive.len()
        )));
    }

    let mut first_file = None;
    let mut first_xml = None;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name();
        if name.contains("..") || name.starts_with('/') || name.starts_with('\\') {
            return Err(DecompressError::SuspiciousArchive(format!(
                "Path traversal attempt detected: {}",
                name
            )));
        }
        if name.len() > config.max_filename_length {
            return Err(DecompressError::SuspiciousArchive("Filename too long".to_string()));
        }
        if first_file.is_none() {
            first_file = Some(i);
        }
        if first_xml.is_none() && name.to_lowercase().ends_with(".xml") {
            first_xml = Some(i);
        }
    }

    let index = first_xml.or(first_file).ok_or(DecompressError::EmptyArchive)?;
    let entry = archive.by_index(index)?;
    debug!("using zip entry {} ({})", index, entry.name());

    let compressed_size = entry.compressed_size();
    let uncompressed_size = entry.size();
    if compressed_size > 0 {
        let compression_ratio = uncompressed_size as f64 / compressed_size as f64;
        if compression_ratio > config.max_compression_ratio {
            return Err(DecompressError::SuspiciousArchive(format!(
                "Suspicious compression ratio: {:.2}",
                compression_ratio
            )));
        }
    }
    if uncompressed_size > config.max_decompressed_size as u64 {
        return Err(too_large(config));
    }

    let contents = read_limited(entry, config.max_decompressed_size)
        .map_err(|e| DecompressError::Zip(e.into()))?;
    check_size(&contents, config)?;
    Ok(contents)
}

/// Reads at most `limit + 1` bytes so oversized streams are detected without
/// inflating them completely.
fn read_limited<R: Read>(reader: R, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut contents = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut contents)?;
    Ok(contents)
}

fn check_size(contents: &[u8], config: &Config) -> Result<(), DecompressError> {
    if contents.len() > config.max_decompressed_size {
        return Err(too_large(config));
    }
    Ok(())
}

fn too_large(config: &Config) -> DecompressError {
    DecompressError::LimitExceeded(format!(
        "Decompressed size too large (limit {} bytes)",
        config.max_decompressed_size
    ))
}
