//! Configuration for the DevPulse watcher and CLI.
//!
//! Settings are layered: `devpulse.toml` → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [api]
//! base_url = "http://localhost:8080/api"
//! timeout_secs = 30
//! session_token = "..."        # sent as the `session_token` cookie
//!
//! [watch]
//! max_wait_secs = 120
//! poll_interval_secs = 5
//!
//! [logging]
//! filter = "info"
//! format = "pretty"            # or "json"
//! ```
//!
//! # Environment Overrides
//!
//! | Variable                       | Overrides                  |
//! |--------------------------------|----------------------------|
//! | `DEVPULSE_API_URL`             | `api.base_url`             |
//! | `DEVPULSE_SESSION_TOKEN`       | `api.session_token`        |
//! | `DEVPULSE_MAX_WAIT_SECS`       | `watch.max_wait_secs`      |
//! | `DEVPULSE_POLL_INTERVAL_SECS`  | `watch.poll_interval_secs` |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::watcher::WatcherConfig;

/// Config file name looked up in the working directory and the user config dir.
pub const CONFIG_FILE_NAME: &str = "devpulse.toml";

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_WAIT_SECS: u64 = 120;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines on stderr (default)
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// DevPulse REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL including the `/api` prefix
    #[serde(default = "default_api_url")]
    pub base_url: String,
    /// Timeout for plain (non-stream) requests
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Session token issued by the DevPulse login flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            session_token: None,
        }
    }
}

/// Watch timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSection {
    /// Give up waiting after this many seconds
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    /// Interval between polls once the event stream is lost
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_max_wait_secs() -> u64 {
    DEFAULT_MAX_WAIT_SECS
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

/// Root of `devpulse.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevpulseConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub watch: WatchSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DevpulseConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse devpulse.toml")?;
        config.check().context("Invalid devpulse.toml")?;
        Ok(config)
    }

    /// Reject settings the watcher cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.watch.poll_interval_secs == 0 {
            anyhow::bail!("watch.poll_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Load from `explicit` if given, otherwise from the first default location that exists.
    /// Returns default configuration if no file is found.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::discover() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// First existing config file among `./devpulse.toml` and `<config_dir>/devpulse/devpulse.toml`.
    pub fn discover() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|p| p.exists())
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("devpulse").join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize devpulse.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `DEVPULSE_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DEVPULSE_API_URL").filter(|v| !v.is_empty()) {
            self.api.base_url = url;
        }
        if let Some(token) = lookup("DEVPULSE_SESSION_TOKEN").filter(|v| !v.is_empty()) {
            self.api.session_token = Some(token);
        }
        if let Some(secs) = lookup("DEVPULSE_MAX_WAIT_SECS") {
            self.watch.max_wait_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid DEVPULSE_MAX_WAIT_SECS '{}'", secs))?;
        }
        if let Some(secs) = lookup("DEVPULSE_POLL_INTERVAL_SECS") {
            self.watch.poll_interval_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid DEVPULSE_POLL_INTERVAL_SECS '{}'", secs))?;
        }
        self.check().context("Invalid DEVPULSE_* environment override")
    }

    /// Timing settings for the watcher.
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            max_wait: Duration::from_secs(self.watch.max_wait_secs),
            poll_interval: Duration::from_secs(self.watch.poll_interval_secs),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let url = self.api.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warnings.push(format!(
                "Invalid api.base_url '{}': must start with http:// or https://",
                self.api.base_url
            ));
        }
        if self.api.timeout_secs == 0 {
            warnings.push("api.timeout_secs is 0: requests will fail immediately".to_string());
        }
        if self.watch.max_wait_secs == 0 {
            warnings.push("watch.max_wait_secs is 0: every watch times out at once".to_string());
        }
        if self.watch.poll_interval_secs >= self.watch.max_wait_secs {
            warnings.push(format!(
                "watch.poll_interval_secs ({}) is not below watch.max_wait_secs ({}): the polling fallback never runs",
                self.watch.poll_interval_secs, self.watch.max_wait_secs
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.filter).is_err() {
            warnings.push(format!(
                "Invalid logging.filter '{}'",
                self.logging.filter
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DevpulseConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:8080/api");
        assert_eq!(config.watch.max_wait_secs, 120);
        assert_eq!(config.watch.poll_interval_secs, 5);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_fills_defaults() {
        let config = DevpulseConfig::parse(
            r#"
            [api]
            base_url = "https://pulse.example.com/api"

            [watch]
            poll_interval_secs = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://pulse.example.com/api");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.watch.poll_interval_secs, 3);
        assert_eq!(config.watch.max_wait_secs, 120);
    }

    #[test]
    fn test_parse_rejects_bad_format() {
        let err = DevpulseConfig::parse("[logging]\nformat = \"xml\"").unwrap_err();
        assert!(err.to_string().contains("devpulse.toml"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = DevpulseConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("DEVPULSE_API_URL", "http://10.0.0.5:8080/api"),
                ("DEVPULSE_SESSION_TOKEN", "tok"),
                ("DEVPULSE_MAX_WAIT_SECS", "30"),
                ("DEVPULSE_POLL_INTERVAL_SECS", " 2 "),
            ]))
            .unwrap();
        assert_eq!(config.api.base_url, "http://10.0.0.5:8080/api");
        assert_eq!(config.api.session_token.as_deref(), Some("tok"));
        assert_eq!(config.watch.max_wait_secs, 30);
        assert_eq!(config.watch.poll_interval_secs, 2);
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = DevpulseConfig::default();
        config
            .apply_overrides(lookup_from(&[("DEVPULSE_API_URL", "")]))
            .unwrap();
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_invalid_env_number_is_an_error() {
        let mut config = DevpulseConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("DEVPULSE_MAX_WAIT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("DEVPULSE_MAX_WAIT_SECS"));
    }

    #[test]
    fn test_watcher_config_conversion() {
        let mut config = DevpulseConfig::default();
        config.watch.max_wait_secs = 60;
        config.watch.poll_interval_secs = 4;
        let watcher = config.watcher_config();
        assert_eq!(watcher.max_wait, Duration::from_secs(60));
        assert_eq!(watcher.poll_interval, Duration::from_secs(4));
    }

    #[test]
    fn test_validate_flags_problems() {
        let mut config = DevpulseConfig::default();
        config.api.base_url = "localhost:8080".to_string();
        config.watch.poll_interval_secs = 200;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("api.base_url"));
        assert!(warnings[1].contains("polling fallback never runs"));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let err = DevpulseConfig::parse("[watch]\npoll_interval_secs = 0").unwrap_err();
        assert!(format!("{:#}", err).contains("watch.poll_interval_secs must be at least 1"));

        let mut config = DevpulseConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("DEVPULSE_POLL_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("at least 1"));
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = DevpulseConfig::default();
        config.api.base_url = "https://pulse.internal/api".to_string();
        config.logging.format = LogFormat::Json;
        config.save(&path).unwrap();

        let loaded = DevpulseConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.api.base_url, "https://pulse.internal/api");
        assert_eq!(loaded.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = DevpulseConfig::load_or_default(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
