//! Command-line inspection of channel archive indexes
//!
//! The `chanarch` binary is a thin wrapper around this crate: it parses a
//! [`CliConfig`], installs logging and prints what [`run`] renders.
//!
//! # Commands
//!
//! - `info`: header fields, channel directory and covered span per channel
//! - `dump <channel>`: every node of a channel's tree
//! - `query <channel> <start> <end>`: data blocks overlapping a time range
//! - `verify [channel]`: tree consistency check
//!
//! # Example
//!
//! ```no_run
//! use chanarch_cli::{CliConfig, run};
//!
//! let config = CliConfig::from_args();
//! print!("{}", run(&config)?);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod commands;
pub mod config;

pub use commands::run;
pub use config::{CliConfig, Command, parse_time};
