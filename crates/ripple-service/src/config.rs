//! Host configuration.

use std::path::PathBuf;

use ripple_types::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Configuration honored by the embedding host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Event database file. Absent means an in-memory database.
    pub database_path: Option<PathBuf>,

    /// Optional YAML service-graph file (`services` + `dependencies`).
    pub graph_path: Option<PathBuf>,

    /// Log verbosity for the host's subscriber; the core never installs one.
    pub log_filter: Option<String>,

    /// Per-operation deadline in milliseconds. Absent means unbounded.
    pub op_timeout_ms: Option<u64>,

    /// Blast-radius traversal depth override.
    pub blast_radius_depth: Option<usize>,
}

impl ServiceConfig {
    /// Load configuration from a TOML file. A missing path (or `None`)
    /// yields the defaults.
    pub fn load(path: Option<&str>) -> CoreResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let path = PathBuf::from(path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            CoreError::unavailable(format!("failed to read config {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            CoreError::validation_with_hint(
                format!("invalid config {}: {e}", path.display()),
                "expected TOML with database_path / graph_path / log_filter keys",
            )
        })
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or("info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::load(None).unwrap();
        assert!(config.database_path.is_none());
        assert_eq!(config.log_filter(), "info");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = ServiceConfig::load(Some("/nonexistent/ripple.toml")).unwrap();
        assert!(config.graph_path.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ripple.toml");
        std::fs::write(
            &path,
            "database_path = \"/var/lib/ripple/events.db\"\nlog_filter = \"debug\"\nop_timeout_ms = 5000\n",
        )
        .unwrap();
        let config = ServiceConfig::load(path.to_str()).unwrap();
        assert_eq!(
            config.database_path.as_deref(),
            Some(std::path::Path::new("/var/lib/ripple/events.db"))
        );
        assert_eq!(config.log_filter(), "debug");
        assert_eq!(config.op_timeout_ms, Some(5000));
    }

    #[test]
    fn test_invalid_toml_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ripple.toml");
        std::fs::write(&path, "database_path = [1, 2]").unwrap();
        let err = ServiceConfig::load(path.to_str()).unwrap_err();
        assert_eq!(err.kind(), ripple_types::ErrorKind::Validation);
    }
}
