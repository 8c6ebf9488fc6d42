//! Configuration for the Redash exporter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the Redash API key.
pub const API_KEY_ENV: &str = "REDASH_API_KEY";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Failed to initialize tracing: {0}")]
    Logging(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Upstream Redash server.
    #[serde(default)]
    pub redash: RedashConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Polling settings.
    #[serde(default)]
    pub poll: PollConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream Redash server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedashConfig {
    /// URL scheme, "http" or "https" (default: "http").
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Host name (default: "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    /// Port (default: "5000").
    #[serde(default = "default_port")]
    pub port: String,

    /// Request timeout in seconds. Unset means the HTTP client default.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> String {
    "5000".to_string()
}

impl Default for RedashConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            request_timeout_secs: None,
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: ":9295").
    ///
    /// An address without a host, such as ":9295", listens on all interfaces.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    ":9295".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl PrometheusConfig {
    /// Parse the listen address into a socket address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_listen_address(&self.listen)
    }
}

/// Polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds between two polls of the status endpoint (default: 30).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    30
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Validation(format!(
                "Unknown log format: {}",
                other
            ))),
        }
    }
}

/// Parse a listen address, accepting the host-less ":port" form.
pub fn parse_listen_address(listen: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    };

    normalized
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", listen)))
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "interval_secs must be > 0".to_string(),
            ));
        }

        if self.redash.request_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.redash.scheme != "http" && self.redash.scheme != "https" {
            return Err(ConfigError::Validation(format!(
                "Unsupported Redash scheme: {}",
                self.redash.scheme
            )));
        }

        if self.redash.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Redash host must not be empty".to_string(),
            ));
        }

        if self.redash.port.parse::<u16>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid Redash port: {}",
                self.redash.port
            )));
        }

        self.prometheus.listen_addr()?;

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        // "/" serves the landing page.
        if self.prometheus.path == "/" {
            return Err(ConfigError::Validation(
                "Metrics path must not be /".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.redash.scheme, "http");
        assert_eq!(config.redash.host, "localhost");
        assert_eq!(config.redash.port, "5000");
        assert_eq!(config.redash.request_timeout_secs, None);
        assert_eq!(config.prometheus.listen, ":9295");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.poll.interval_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            redash: {
                scheme: "https",
                host: "redash.example.com",
                port: "443",
                request_timeout_secs: 10,
            },
            prometheus: {
                listen: "127.0.0.1:9296",
                path: "/prometheus/metrics",
            },
            poll: { interval_secs: 15 },
            logging: {
                level: "debug",
                format: "json",
            },
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.redash.scheme, "https");
        assert_eq!(config.redash.host, "redash.example.com");
        assert_eq!(config.redash.port, "443");
        assert_eq!(config.redash.request_timeout_secs, Some(10));
        assert_eq!(config.prometheus.listen, "127.0.0.1:9296");
        assert_eq!(config.prometheus.path, "/prometheus/metrics");
        assert_eq!(config.poll.interval(), Duration::from_secs(15));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_listen_address_without_host() {
        let addr = parse_listen_address(":9295").unwrap();
        assert_eq!(addr, "0.0.0.0:9295".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = ExporterConfig::parse(r#"{ prometheus: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let result = ExporterConfig::parse(r#"{ prometheus: { path: "no-leading-slash" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );

        assert!(ExporterConfig::parse(r#"{ prometheus: { path: "/" } }"#).is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let result = ExporterConfig::parse("{ poll: { interval_secs: 0 } }");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_redash_target() {
        assert!(ExporterConfig::parse(r#"{ redash: { scheme: "ftp" } }"#).is_err());
        assert!(ExporterConfig::parse(r#"{ redash: { host: "" } }"#).is_err());
        assert!(ExporterConfig::parse(r#"{ redash: { port: "http" } }"#).is_err());
        assert!(ExporterConfig::parse(r#"{ redash: { port: "70000" } }"#).is_err());
        assert!(ExporterConfig::parse("{ redash: { request_timeout_secs: 0 } }").is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ redash: {{ host: \"redash.internal\" }} }}").unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.redash.host, "redash.internal");
    }

    #[test]
    fn test_load_missing_file() {
        let result = ExporterConfig::load_from_file("/nonexistent/redash-exporter.json5");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
