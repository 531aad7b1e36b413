//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port to listen on
    pub port: u16,

    /// Directory for uploaded blobs
    pub upload_dir: PathBuf,

    /// SQLite database path
    pub database_path: PathBuf,

    /// Append-only activity log path
    pub activity_log: PathBuf,

    /// Seconds a connection may sit between commands before it is closed
    pub idle_timeout_secs: u64,

    /// Seconds of server-wide inactivity (no connections, no commands)
    /// before the server shuts itself down
    pub shutdown_after_secs: u64,

    /// Seconds between inactivity checks
    pub idle_poll_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 55000,
            upload_dir: PathBuf::from("server_uploads"),
            database_path: PathBuf::from("fileflix.db"),
            activity_log: PathBuf::from("server_activity.log"),
            idle_timeout_secs: 120,
            shutdown_after_secs: 120,
            idle_poll_secs: 60,
        }
    }
}

impl Config {
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_after(&self) -> Duration {
        Duration::from_secs(self.shutdown_after_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_or_default("/nonexistent/fileflix.toml").unwrap();
        assert_eq!(config.port, 55000);
        assert_eq!(config.idle_timeout_secs, 120);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fileflix.toml");
        std::fs::write(
            &path,
            r#"
            port = 6000
            upload_dir = "blobs"
            database_path = "test.db"
            activity_log = "test.log"
            idle_timeout_secs = 5
            shutdown_after_secs = 10
            idle_poll_secs = 1
            "#,
        )
        .unwrap();

        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.upload_dir, PathBuf::from("blobs"));
        assert_eq!(config.idle_timeout(), Duration::from_secs(5));
    }
}
