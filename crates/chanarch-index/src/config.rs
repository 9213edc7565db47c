//! Configuration for opening and querying archive indexes

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::rtree::QueryOptions;

/// Largest fanout accepted by default
pub const DEFAULT_MAX_FANOUT: u32 = 4096;

/// Configuration for an archive index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Memory map the index file instead of issuing positional reads
    pub use_mmap: bool,

    /// Largest fanout accepted from a tree anchor
    pub max_fanout: u32,

    /// Check parent pointers while querying
    pub verify_parents: bool,

    /// Sort query results by interval
    pub sort_results: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            use_mmap: true,
            max_fanout: DEFAULT_MAX_FANOUT,
            verify_parents: false,
            sort_results: false,
        }
    }
}

impl IndexConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&text).map_err(|e| {
            IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {e}", path.as_ref().display()),
            ))
        })
    }

    /// Enable or disable memory mapping
    #[must_use]
    pub const fn with_mmap(mut self, enable: bool) -> Self {
        self.use_mmap = enable;
        self
    }

    /// Set the largest accepted fanout
    #[must_use]
    pub const fn with_max_fanout(mut self, max: u32) -> Self {
        self.max_fanout = max;
        self
    }

    /// Enable or disable parent pointer checks during queries
    #[must_use]
    pub const fn with_verify_parents(mut self, enable: bool) -> Self {
        self.verify_parents = enable;
        self
    }

    /// Enable or disable result sorting
    #[must_use]
    pub const fn with_sort_results(mut self, enable: bool) -> Self {
        self.sort_results = enable;
        self
    }

    /// Default query options derived from this configuration
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions::default()
            .with_verify_parents(self.verify_parents)
            .with_sort_results(self.sort_results)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert!(config.use_mmap);
        assert_eq!(config.max_fanout, 4096);
        assert!(!config.verify_parents);
    }

    #[test]
    fn test_builders() {
        let config = IndexConfig::default()
            .with_mmap(false)
            .with_max_fanout(64)
            .with_verify_parents(true);
        assert!(!config.use_mmap);
        assert_eq!(config.max_fanout, 64);
        assert!(config.query_options().verify_parents);
        assert!(!config.query_options().sort_results);
    }

    #[test]
    fn test_partial_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "use_mmap": false, "sort_results": true }}"#).unwrap();

        let config = IndexConfig::from_json_file(file.path()).unwrap();
        assert!(!config.use_mmap);
        assert!(config.sort_results);
        assert_eq!(config.max_fanout, DEFAULT_MAX_FANOUT);
    }

    #[test]
    fn test_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = IndexConfig::from_json_file(file.path()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }
}
