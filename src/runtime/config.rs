//! Server configuration.

use std::time::Duration;
use tracing::warn;

pub const PORT_ENV: &str = "PORT";
pub const FUNCTION_TARGET_ENV: &str = "FUNCTION_TARGET";
pub const TIMEOUT_ENV: &str = "CLOUD_RUN_TIMEOUT_SECONDS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Configuration for the function server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// When set, only this function is served, at `/`.
    pub function_target: Option<String>,
    /// Per-request deadline in seconds, unparsed.
    pub timeout_seconds: Option<String>,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            function_target: None,
            timeout_seconds: None,
            max_body_size: 10 * 1024 * 1024, // 10MB
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `PORT`, `FUNCTION_TARGET`, `CLOUD_RUN_TIMEOUT_SECONDS` and
    /// `LOG_FORMAT` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ServerConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(port) = lookup(PORT_ENV) {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!("Invalid {} {:?}, using {}", PORT_ENV, port, config.port),
            }
        }
        config.function_target = lookup(FUNCTION_TARGET_ENV).filter(|t| !t.is_empty());
        config.timeout_seconds = lookup(TIMEOUT_ENV).filter(|t| !t.is_empty());
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            match LogFormat::parse(&format) {
                Some(format) => config.log_format = format,
                None => warn!("Invalid {} {:?}, using text", LOG_FORMAT_ENV, format),
            }
        }
        config
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Serve only `target`, at `/`.
    pub fn function_target(mut self, target: impl Into<String>) -> Self {
        self.function_target = Some(target.into());
        self
    }

    /// Set the per-request deadline, in seconds.
    pub fn timeout_seconds(mut self, timeout: impl Into<String>) -> Self {
        self.timeout_seconds = Some(timeout.into());
        self
    }

    /// Set the maximum request body size.
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The per-request timeout. An unparseable value is logged and ignored.
    pub fn timeout(&self) -> Option<Duration> {
        let raw = self.timeout_seconds.as_deref()?;
        match raw.trim().parse::<u64>() {
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(err) => {
                warn!(
                    "Could not parse {} {:?}: {}; serving without a deadline",
                    TIMEOUT_ENV, raw, err
                );
                None
            }
        }
    }
}
