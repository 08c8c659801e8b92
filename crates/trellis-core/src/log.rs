//! Tracing subscriber setup.
//!
//! Output goes to stderr unless file logging is enabled, in which case
//! it is appended to `~/.config/trellis/logs/trellis.log`. An oversized
//! log file is rotated to `trellis.log.1` at startup (one backup kept).
//! The `TRELLIS_LOG` environment variable overrides the configured level
//! with a full `EnvFilter` directive.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive, e.g. `trellis=debug`.
pub const ENV_FILTER_VAR: &str = "TRELLIS_LOG";

const LOG_FILE_NAME: &str = "trellis.log";
const BACKUP_FILE_NAME: &str = "trellis.log.1";

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether to write to the log file instead of stderr. Defaults to `false`.
    pub enabled: bool,
    /// Minimum log level: "trace", "debug", "info", "warn", or "error".
    pub level: String,
    /// Emit one JSON object per line.
    pub json: bool,
    /// Maximum log file size in megabytes before rotation.
    pub max_file_mb: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".into(),
            json: false,
            max_file_mb: 10,
        }
    }
}

/// Returns the log file path: `~/.config/trellis/logs/trellis.log`.
pub fn log_path() -> Option<PathBuf> {
    crate::config::config_dir().map(|d| d.join("logs").join(LOG_FILE_NAME))
}

/// Installs the global subscriber. Call once at process startup.
///
/// Later calls (and calls from tests that race each other) are ignored.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_env(ENV_FILTER_VAR)
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let file = if config.enabled {
        open_log_file(config)
    } else {
        None
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true);
    let _ = match (file, config.json) {
        (Some(file), true) => builder
            .json()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        (Some(file), false) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        (None, true) => builder.json().with_writer(io::stderr).try_init(),
        (None, false) => builder.with_writer(io::stderr).try_init(),
    };
}

fn open_log_file(config: &LogConfig) -> Option<File> {
    let path = log_path()?;
    let dir = path.parent()?;
    fs::create_dir_all(dir).ok()?;

    let max_bytes = config.max_file_mb * 1024 * 1024;
    let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    if max_bytes > 0 && size >= max_bytes {
        let _ = fs::rename(&path, dir.join(BACKUP_FILE_NAME));
    }

    OpenOptions::new().create(true).append(true).open(&path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_config_defaults_to_stderr_info() {
        let config = LogConfig::default();

        assert!(!config.enabled);
        assert_eq!(config.level, "info");
        assert!(!config.json);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        // Arrange
        let toml_str = "json = true\n";

        // Act
        let config: LogConfig = toml::from_str(toml_str).unwrap();

        // Assert
        assert!(config.json);
        assert_eq!(config.max_file_mb, 10);
    }

    #[test]
    fn init_twice_does_not_panic() {
        let config = LogConfig::default();

        init(&config);
        init(&config);
    }
}
