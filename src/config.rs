//! Application configuration
//!
//! Loaded once from an optional JSON file and handed to each component. Every
//! key is optional; missing keys take the defaults below.

use crate::node::fetcher::{
    FetcherConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_MS,
    DEFAULT_USER_AGENT,
};
use crate::node::output::{OutputWriter, DEFAULT_OUTPUT_DIR, DEFAULT_RAW_DIR};
use crate::node::parser::{ParserConfig, DEFAULT_SUPPORTED_PROTOCOLS};
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Default source list path
pub const DEFAULT_SOURCES_PATH: &str = "url.yaml";

/// Default number of sources fetched at once
pub const DEFAULT_CONCURRENCY: usize = 4;

pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Per-request timeout in milliseconds
    pub timeout: u64,
    /// Attempts per source
    pub retries: u32,
    pub max_redirects: usize,
    #[serde(rename = "ignoreSSLErrors")]
    pub ignore_ssl_errors: bool,
    pub concurrency: usize,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_MAX_ATTEMPTS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            ignore_ssl_errors: true,
            concurrency: DEFAULT_CONCURRENCY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputConfig {
    pub directory: String,
    pub raw_directory: String,
    pub save_raw_files: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: DEFAULT_OUTPUT_DIR.to_string(),
            raw_directory: DEFAULT_RAW_DIR.to_string(),
            save_raw_files: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParsingConfig {
    pub supported_protocols: Vec<String>,
    pub skip_comments: bool,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            supported_protocols: DEFAULT_SUPPORTED_PROTOCOLS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            skip_comments: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    pub level: String,
    pub show_progress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            show_progress: true,
        }
    }
}

/// Whole-application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub output: OutputConfig,
    pub parsing: ParsingConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is an error.
    /// Runs before logging is set up, so it does not log.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig::new()
            .with_timeout(Duration::from_millis(self.network.timeout))
            .with_max_attempts(self.network.retries)
            .with_max_redirects(self.network.max_redirects)
            .with_accept_invalid_certs(self.network.ignore_ssl_errors)
            .with_user_agent(self.network.user_agent.clone())
    }

    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig::new()
            .with_supported_protocols(self.parsing.supported_protocols.clone())
            .with_skip_comments(self.parsing.skip_comments)
    }

    pub fn output_writer(&self) -> OutputWriter {
        OutputWriter::new(&self.output.directory, &self.output.raw_directory)
            .with_save_raw(self.output.save_raw_files)
    }
}

/// Read source addresses: one per line, blank and `#` lines skipped
pub fn read_sources<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read source list {}", path.display()))?;
    Ok(parse_sources(&content))
}

pub fn parse_sources(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
