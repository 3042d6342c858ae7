// ABOUTME: Application configuration loaded from a TOML file with defaults for every key
// Resolves the config path through the platform config directory

use crate::error::{ConsoleError, Result};
use crate::logs::LogMode;
use crate::session::ReconnectPolicy;
use crate::terminal::Framing;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable that overrides `server.url`
pub const SERVER_URL_ENV: &str = "CONTAINER_CONSOLE_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub session: SessionConfig,
    pub logs: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub framing: Framing,
    pub reconnect: ReconnectPolicy,
    pub resize_debounce_ms: u64,
    pub initial_cols: u16,
    pub initial_rows: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Tagged,
            reconnect: ReconnectPolicy::AwaitAcknowledge,
            resize_debounce_ms: 50,
            initial_cols: 80,
            initial_rows: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub mode: LogMode,
    pub refresh_interval_ms: u64,
    pub max_buffer_bytes: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            mode: LogMode::Poll,
            refresh_interval_ms: 2_000,
            max_buffer_bytes: 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Load from the default location, then apply the environment override
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            Some(path) => {
                debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConsoleError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            toml::from_str(contents).map_err(|e| ConsoleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "container-console")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                info!("Using server URL from {}: {}", SERVER_URL_ENV, url);
                self.server.url = url;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.server.url)
            .map_err(|e| ConsoleError::Config(format!("server.url: {}", e)))?;
        if self.polling.interval_ms == 0 {
            return Err(ConsoleError::Config("polling.interval_ms must be > 0".into()));
        }
        if self.logs.refresh_interval_ms == 0 {
            return Err(ConsoleError::Config("logs.refresh_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.server.connect_timeout_ms)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.session.resize_debounce_ms)
    }

    pub fn log_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.logs.refresh_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.session.framing, Framing::Tagged);
        assert_eq!(config.session.reconnect, ReconnectPolicy::AwaitAcknowledge);
        assert_eq!(config.logs.mode, LogMode::Poll);
        assert_eq!(config.log_refresh_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
url = "https://console.internal:9443"

[session]
framing = "raw"
reconnect = "silent"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.server.url, "https://console.internal:9443");
        assert_eq!(config.server.request_timeout_ms, 10_000);
        assert_eq!(config.session.framing, Framing::Raw);
        assert_eq!(config.session.reconnect, ReconnectPolicy::Silent);
        assert_eq!(config.session.resize_debounce_ms, 50);
        assert_eq!(config.polling.interval_ms, 5_000);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = AppConfig::from_toml("   \n").unwrap();
        assert_eq!(config.server.url, "http://localhost:8080");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            AppConfig::from_toml("[polling]\ninterval_ms = 0\n"),
            Err(ConsoleError::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[server]\nurl = \"not a url\"\n"),
            Err(ConsoleError::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[session]\nframing = \"morse\"\n"),
            Err(ConsoleError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load_from(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConsoleError::Config(_))));
    }
}
