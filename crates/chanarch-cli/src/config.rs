//! Command-line configuration
//!
//! Options come from CLI arguments with environment fallbacks
//! (`CHANARCH_INDEX`, `CHANARCH_CONFIG`). Index options can additionally be
//! loaded from a JSON file; flags given on the command line win over it.

use anyhow::{Context, Result};
use chanarch_index::{IndexConfig, Instant};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line configuration
#[derive(Debug, Clone, Parser)]
#[command(
    name = "chanarch",
    about = "Inspect and query channel archive indexes",
    version
)]
pub struct CliConfig {
    /// Archive index file
    #[arg(long, short, env = "CHANARCH_INDEX")]
    pub index: PathBuf,

    /// JSON file with index options
    #[arg(long, env = "CHANARCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Read the index with positional reads instead of memory mapping it
    #[arg(long)]
    pub no_mmap: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHANARCH_LOG_JSON")]
    pub log_json: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show the index header, channels and their covered time spans
    Info,

    /// Print every node of a channel's tree
    Dump {
        /// Channel name
        channel: String,
    },

    /// List the data blocks of a channel overlapping a time range
    Query {
        /// Channel name
        channel: String,

        /// Range start, RFC 3339 or `YYYY-MM-DD[ HH:MM:SS[.f]]` in UTC
        #[arg(value_parser = parse_time)]
        start: Instant,

        /// Range end, same formats as the start
        #[arg(value_parser = parse_time)]
        end: Instant,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Sort results by time
        #[arg(long)]
        sort: bool,

        /// Newest blocks first
        #[arg(long)]
        reverse: bool,

        /// Check parent pointers while descending
        #[arg(long)]
        verify_parents: bool,
    },

    /// Check tree consistency for one channel or all of them
    Verify {
        /// Channel name, all channels when omitted
        channel: Option<String>,
    },
}

impl CliConfig {
    /// Parse configuration from command-line arguments
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Index options from the config file, if any, overridden by flags
    pub fn index_config(&self) -> Result<IndexConfig> {
        let mut config = match &self.config {
            Some(path) => IndexConfig::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => IndexConfig::default(),
        };
        if self.no_mmap {
            config = config.with_mmap(false);
        }
        if let Command::Query {
            sort,
            verify_parents,
            ..
        } = &self.command
        {
            config.sort_results |= *sort;
            config.verify_parents |= *verify_parents;
        }
        Ok(config)
    }

    /// Default log filter when RUST_LOG is unset
    pub const fn log_filter(&self) -> &'static str {
        if self.verbose { "debug" } else { "warn" }
    }
}

/// Parse a UTC time given as RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`,
/// `YYYY-MM-DDTHH:MM:SS[.f]` or `YYYY-MM-DD`
pub fn parse_time(s: &str) -> std::result::Result<Instant, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Instant::from_datetime(dt.to_utc()));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Instant::from_datetime(naive.and_utc()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(naive) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(Instant::from_datetime(naive.and_utc()));
    }
    Err(format!(
        "invalid time '{s}': expected RFC 3339 or YYYY-MM-DD[ HH:MM:SS[.f]]"
    ))
}
