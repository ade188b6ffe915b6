//! Configuration module for uptrail.
//!
//! Loads configuration from a TOML file, then applies environment overrides.

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default probe timeout when a target specifies a non-positive one.
const DEFAULT_TIMEOUT_SECONDS: f64 = 10.0;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub monitor: MonitorConfig,
    pub targets: Vec<TargetConfig>,
    pub alerts: AlertsConfig,
    pub heartbeat: Option<HeartbeatConfig>,
}

/// Database location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (default: "data/uptrail.db")
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/uptrail.db".to_string(),
        }
    }
}

/// Global monitoring settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_seconds: u64,
    pub retention_days: u32,
    /// Upper bound on concurrent probes.
    pub max_workers: usize,
    /// Run retention pruning every N dispatch cycles.
    pub prune_every_cycles: u64,
    /// Offset between the initial probes of consecutive targets.
    pub stagger_seconds: u64,
    pub follow_redirects: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            retention_days: 30,
            max_workers: 3,
            prune_every_cycles: 100,
            stagger_seconds: 2,
            follow_redirects: true,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub latency_threshold_ms: Option<u64>,
    #[serde(default)]
    pub latency_consecutive_checks: Option<u32>,
}

fn default_timeout_seconds() -> f64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl TargetConfig {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            latency_threshold_ms: None,
            latency_consecutive_checks: None,
        }
    }

    /// Enable the latency tripwire for this target.
    pub fn with_latency_tripwire(mut self, threshold_ms: u64, consecutive_checks: u32) -> Self {
        self.latency_threshold_ms = Some(threshold_ms);
        self.latency_consecutive_checks = Some(consecutive_checks);
        self
    }

    /// Probe timeout, falling back to the default for non-positive values.
    pub fn timeout(&self) -> Duration {
        if self.timeout_seconds.is_finite() && self.timeout_seconds > 0.0 {
            Duration::from_secs_f64(self.timeout_seconds)
        } else {
            Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS)
        }
    }

    /// Threshold and required consecutive count, if the tripwire is configured.
    pub fn latency_tripwire(&self) -> Option<(u64, u32)> {
        match (self.latency_threshold_ms, self.latency_consecutive_checks) {
            (Some(threshold), Some(checks)) => Some((threshold, checks.max(1))),
            _ => None,
        }
    }
}

/// Alert delivery configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub webhooks: Vec<WebhookConfig>,
    pub smtp: Option<SmtpConfig>,
    /// Total delivery attempts per alert, including the first.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Permit webhook URLs that resolve to loopback or private ranges.
    pub allow_private_webhooks: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhooks: Vec::new(),
            smtp: None,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            allow_private_webhooks: false,
        }
    }
}

/// A webhook receiver.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub on_failure: bool,
    #[serde(default = "default_true")]
    pub on_recovery: bool,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl WebhookConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            enabled: true,
            on_failure: true,
            on_recovery: true,
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

/// SMTP email channel.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from_addr: String,
    pub to_addrs: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub on_failure: bool,
    #[serde(default = "default_true")]
    pub on_recovery: bool,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

/// Dead-man's-switch heartbeat.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    pub url: String,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_cooldown_seconds() -> u64 {
    300
}

fn default_smtp_port() -> u16 {
    587
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_heartbeat_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from the file named by `UPTRAIL_CONFIG`.
    ///
    /// Environment variables:
    /// - `UPTRAIL_CONFIG`: config file path (default: "uptrail.toml")
    /// - `UPTRAIL_DB_PATH`: overrides `database.path`
    /// - `UPTRAIL_MONITOR_INTERVAL`: overrides `monitor.interval_seconds`
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("UPTRAIL_CONFIG").unwrap_or_else(|_| "uptrail.toml".to_string());
        let mut cfg = Self::from_file(&path)?;

        if let Ok(db_path) = env::var("UPTRAIL_DB_PATH") {
            cfg.database.path = db_path;
        }

        if let Ok(interval_str) = env::var("UPTRAIL_MONITOR_INTERVAL") {
            if let Ok(interval) = interval_str.parse() {
                cfg.monitor.interval_seconds = interval;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a config file without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.max_workers == 0 {
            return Err(ConfigError::Invalid("monitor.max_workers must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Invalid("target name cannot be empty".to_string()));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate target name: {}", target.name)));
            }
            if !(target.url.starts_with("http://") || target.url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "target {} must use an http(s) URL: {}",
                    target.name, target.url
                )));
            }
            let has_threshold = target.latency_threshold_ms.is_some();
            if has_threshold != target.latency_consecutive_checks.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "target {} must set both latency_threshold_ms and latency_consecutive_checks",
                    target.name
                )));
            }
        }

        let mut urls = HashSet::new();
        for hook in &self.alerts.webhooks {
            if !urls.insert(hook.url.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate webhook url: {}", hook.url)));
            }
        }

        if let Some(smtp) = &self.alerts.smtp {
            if smtp.enabled && smtp.to_addrs.is_empty() {
                return Err(ConfigError::Invalid("smtp.to_addrs cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[database]
path = "/var/lib/uptrail/uptrail.db"

[monitor]
interval_seconds = 30
retention_days = 7

[[targets]]
name = "api"
url = "https://api.example.com/health"
timeout_seconds = 5
latency_threshold_ms = 500
latency_consecutive_checks = 3

[[targets]]
name = "web"
url = "https://example.com"

[[alerts.webhooks]]
url = "https://hooks.example.com/uptrail"
on_recovery = false

[alerts.smtp]
host = "smtp.example.com"
from_addr = "uptrail@example.com"
to_addrs = ["ops@example.com"]

[heartbeat]
url = "https://hc.example.com/ping/abc"
"#;

    #[test]
    fn test_default_config() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.database.path, "data/uptrail.db");
        assert_eq!(cfg.monitor.interval_seconds, 60);
        assert_eq!(cfg.monitor.max_workers, 3);
        assert_eq!(cfg.alerts.retry_attempts, 3);
        assert!(cfg.heartbeat.is_none());
    }

    #[test]
    fn test_parse_sample() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.monitor.interval_seconds, 30);
        assert_eq!(cfg.monitor.retention_days, 7);
        assert_eq!(cfg.monitor.prune_every_cycles, 100);
        assert_eq!(cfg.targets.len(), 2);
        assert_eq!(cfg.targets[0].latency_tripwire(), Some((500, 3)));
        assert_eq!(cfg.targets[1].latency_tripwire(), None);
        assert_eq!(cfg.targets[1].timeout(), Duration::from_secs(10));

        let hook = &cfg.alerts.webhooks[0];
        assert!(hook.enabled && hook.on_failure && !hook.on_recovery);
        assert_eq!(hook.cooldown_seconds, 300);

        let smtp = cfg.alerts.smtp.as_ref().unwrap();
        assert_eq!(smtp.port, 587);
        assert!(smtp.use_tls);

        let heartbeat = cfg.heartbeat.unwrap();
        assert_eq!(heartbeat.interval_seconds, 60);
        assert!(heartbeat.enabled);
    }

    #[test]
    fn test_non_positive_timeout_falls_back() {
        let mut target = TargetConfig::new("t", "http://example.com");
        target.timeout_seconds = 0.0;
        assert_eq!(target.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let cfg = AppConfig {
            targets: vec![
                TargetConfig::new("a", "http://a.example.com"),
                TargetConfig::new("a", "http://b.example.com"),
            ],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_webhooks() {
        let mut quiet = WebhookConfig::new("https://hooks.example.com/a");
        quiet.on_recovery = false;
        let cfg = AppConfig {
            alerts: AlertsConfig {
                webhooks: vec![WebhookConfig::new("https://hooks.example.com/a"), quiet],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_half_tripwire() {
        let mut target = TargetConfig::new("a", "http://a.example.com");
        target.latency_threshold_ms = Some(100);
        let cfg = AppConfig {
            targets: vec![target],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http() {
        let cfg = AppConfig {
            targets: vec![TargetConfig::new("a", "ftp://a.example.com")],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
