//! Configuration Module
//!
//! This module reads configuration values from environment variables, provides
//! sensible defaults, and validates key security parameters such as maximum file
//! sizes and decompression limits. The pipeline receives a `Config` explicitly and
//! never reads the environment on its own.

use anyhow::Result;
use std::env;
use std::str::FromStr;

const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
const MAX_FILE_SIZE_CEILING: usize = 500_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub webhook_url: Option<String>,
    pub webhook_timeout: u64,
    pub webhook_max_retries: u32,
    pub max_file_size: usize,
    pub max_decompressed_size: usize,
    pub max_files_in_zip: usize,
    pub max_compression_ratio: f64,
    pub max_filename_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            webhook_url: None,
            webhook_timeout: 30,
            webhook_max_retries: 3,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_decompressed_size: 100 * 1024 * 1024,
            max_files_in_zip: 1000,
            max_compression_ratio: 1000.0,
            max_filename_length: 256,
        }
    }
}

impl Config {
    /// Creates a new configuration by reading environment variables.
    /// If a variable is missing or empty, a default value is used.
    pub fn new() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let parsed = |key: &str, default| parse_or(&lookup, key, default);

        let max_file_size = parsed("DMARC_MAX_FILE_SIZE", defaults.max_file_size);
        if max_file_size > MAX_FILE_SIZE_CEILING {
            return Err(anyhow::anyhow!("Max file size too large (500MB limit)"));
        }

        // DMARC_WEBHOOK_TIMEOUT_SECS wins over the older DMARC_WEBHOOK_TIMEOUT.
        let webhook_timeout = lookup("DMARC_WEBHOOK_TIMEOUT_SECS")
            .or_else(|| lookup("DMARC_WEBHOOK_TIMEOUT"))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.webhook_timeout);

        let webhook_url = lookup("DMARC_WEBHOOK_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            webhook_url,
            webhook_timeout,
            webhook_max_retries: parse_or(
                &lookup,
                "DMARC_WEBHOOK_MAX_RETRIES",
                defaults.webhook_max_retries,
            ),
            max_file_size,
            max_decompressed_size: parsed(
                "DMARC_MAX_DECOMPRESSED_SIZE",
                defaults.max_decompressed_size,
            ),
            max_files_in_zip: parsed("DMARC_MAX_FILES_IN_ZIP", defaults.max_files_in_zip),
            max_compression_ratio: parse_or(
                &lookup,
                "DMARC_MAX_COMPRESSION_RATIO",
                defaults.max_compression_ratio,
            ),
            max_filename_length: parsed("DMARC_MAX_FILENAME_LENGTH", defaults.max_filename_length),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
