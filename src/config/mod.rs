//! Service configuration.
//!
//! Values are resolved in three layers, later layers winning:
//!
//! 1. Built-in defaults.
//! 2. An optional TOML file.
//! 3. Environment variables (`HOST`, `PORT`, `REDIS_URL`,
//!    `MAGIC_MATH_CACHE_POLICY`, `LOG_FORMAT`, `LOG_LEVEL`, `APP_ENV`).
//!
//! Command-line flags are applied on top by the binary.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//!
//! [cache]
//! enabled = true
//! url = "redis://localhost:6379"
//! policy = "fail-open"
//! timeout_ms = 500
//!
//! [rate_limit]
//! enabled = true
//! max_requests = 100
//! window_secs = 900
//!
//! [cors]
//! allowed_origins = ["*"]
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CachePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    /// `host:port`, ready for [`Server::bind`](crate::Server::bind).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub url: String,
    pub policy: CachePolicy,
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379".to_string(),
            policy: CachePolicy::FailOpen,
            timeout_ms: 500,
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_secs: 15 * 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}` (expected `text` or `json`)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Parses a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides read through `var`.
    ///
    /// Taking a lookup function instead of reading `std::env` directly keeps
    /// this testable without mutating process state.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT must be a port number, got `{port}`")))?;
        }
        if let Some(url) = var("REDIS_URL") {
            self.cache.url = url;
        }
        if let Some(policy) = var("MAGIC_MATH_CACHE_POLICY") {
            self.cache.policy = policy.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }

        match var("LOG_FORMAT") {
            Some(format) => self.logging.format = format.parse().map_err(ConfigError::Invalid)?,
            None => {
                if var("APP_ENV").is_some_and(|env| env.eq_ignore_ascii_case("production")) {
                    self.logging.format = LogFormat::Json;
                }
            }
        }
        Ok(())
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".into()));
        }
        if self.cache.enabled && self.cache.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cache.url must be set when the cache is enabled".into(),
            ));
        }
        if self.cache.timeout_ms == 0 {
            return Err(ConfigError::Invalid("cache.timeout_ms must be greater than 0".into()));
        }
        if self.rate_limit.enabled {
            if self.rate_limit.max_requests == 0 {
                return Err(ConfigError::Invalid(
                    "rate_limit.max_requests must be greater than 0".into(),
                ));
            }
            if self.rate_limit.window_secs == 0 {
                return Err(ConfigError::Invalid(
                    "rate_limit.window_secs must be greater than 0".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.address(), "0.0.0.0:5000");
        assert!(config.cache.enabled);
        assert_eq!(config.cache.url, "redis://localhost:6379");
        assert_eq!(config.cache.policy, CachePolicy::FailOpen);
        assert_eq!(config.cache.timeout(), Duration::from_millis(500));
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(900));
        assert_eq!(config.cors.allowed_origins, vec!["*"]);
        assert_eq!(config.logging.format, LogFormat::Text);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [cache]
            policy = "fail-fast"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cache.policy, CachePolicy::FailFast);
        assert!(config.cache.enabled);
        assert_eq!(config.rate_limit, RateLimitConfig::default());
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let err = Config::from_toml("[cache]\npolicy = \"sometimes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nformat = \"json\"\nlevel = \"debug\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("PORT", "7000"),
                ("REDIS_URL", "redis://cache:6379/2"),
                ("MAGIC_MATH_CACHE_POLICY", "fail-fast"),
                ("LOG_FORMAT", "json"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.cache.url, "redis://cache:6379/2");
        assert_eq!(config.cache.policy, CachePolicy::FailFast);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn production_defaults_to_json_logs() {
        let mut config = Config::default();
        config.apply_env(env(&[("APP_ENV", "production")])).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);

        let mut config = Config::default();
        config
            .apply_env(env(&[("APP_ENV", "production"), ("LOG_FORMAT", "text")]))
            .unwrap();
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn bad_port_rejected() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.rate_limit.max_requests = 0;
        assert!(config.validate().is_err());

        config.rate_limit.enabled = false;
        config.validate().unwrap();

        config.cache.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_port_zero() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
