// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration and loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders from the environment
//! 3. Parse YAML, TOML or JSON into [`ClientConfig`]
//! 4. Apply `RTDB_*` environment overrides
//! 5. Validate
//!
//! # Example
//!
//! ```yaml
//! options:
//!   auto_reconnect: true
//!   recv_timeout: 30s
//! reconnect:
//!   max_attempts: 10
//!   initial_delay: 200ms
//! server:
//!   host: historian.plant.local
//!   port: 6327
//!   user: ${RTDB_USER:reader}
//!   password: ${RTDB_PASSWORD}
//! ```

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ConfigError, RtdbError, RtdbResult};
use crate::options::SessionOptions;
use crate::retry::{Backoff, ExponentialBackoff, RetryStrategy};
use crate::types::{Credentials, Endpoint};

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// ClientConfig
// =============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Initial options for every session.
    pub options: SessionOptions,
    /// Event pipeline tuning.
    pub pipeline: PipelineConfig,
    /// Reconnect policy used when auto-reconnect is enabled.
    pub reconnect: ReconnectConfig,
    /// Server to connect to with [`RtdbClient::connect_configured`](crate::RtdbClient::connect_configured).
    pub server: Option<ServerConfig>,
}

impl ClientConfig {
    /// Loads configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> RtdbResult<Self> {
        ConfigLoader::new().load(path).map_err(RtdbError::from)
    }

    /// Parses configuration from a string.
    pub fn from_str_with_format(content: &str, format: ConfigFormat) -> RtdbResult<Self> {
        ConfigLoader::new()
            .load_from_str(content, format)
            .map_err(RtdbError::from)
    }

    /// Validates every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.options
            .validate()
            .map_err(|e| ConfigError::validation("options", e.to_string()))?;
        self.pipeline.validate()?;
        self.reconnect.validate()?;
        if let Some(server) = &self.server {
            server.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// PipelineConfig
// =============================================================================

/// Event pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the bounded queue between the read loop and the router.
    pub ingress_capacity: usize,
    /// Per-subscription backlog at which a warning is logged (0 disables).
    pub sink_backlog_warn: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingress_capacity: 1024,
            sink_backlog_warn: 10_000,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.ingress_capacity == 0 {
            return Err(ConfigError::validation(
                "pipeline.ingress_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// ReconnectConfig
// =============================================================================

/// Reconnect backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Delay before the first attempt.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Delay cap.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl ReconnectConfig {
    /// Returns the backoff strategy described by this config.
    pub fn strategy(&self) -> RetryStrategy {
        RetryStrategy::Exponential(
            ExponentialBackoff::new(self.initial_delay, self.max_delay)
                .with_multiplier(self.multiplier)
                .with_jitter(self.jitter),
        )
    }

    /// Starts a fresh attempt counter.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.strategy(), self.max_attempts)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::validation(
                "reconnect.initial_delay",
                "must not exceed max_delay",
            ));
        }
        if !(1.0..=16.0).contains(&self.multiplier) {
            return Err(ConfigError::validation(
                "reconnect.multiplier",
                "must be within 1.0..=16.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::validation(
                "reconnect.jitter",
                "must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// ServerConfig
// =============================================================================

/// Server address and login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ServerConfig {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl ServerConfig {
    /// Returns the endpoint.
    pub fn endpoint(&self) -> RtdbResult<Endpoint> {
        Endpoint::parse(&self.host, i32::from(self.port))
    }

    /// Returns the login credentials.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.user.clone(), self.password.clone())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::validation("server.host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::validation("server.port", "must not be zero"));
        }
        if self.user.is_empty() {
            return Err(ConfigError::validation("server.user", "must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML.
    Yaml,
    /// TOML.
    Toml,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::UnsupportedFormat { extension }),
        }
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`ClientConfig`] from files or strings.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader using the `RTDB` override prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: "RTDB".to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment override prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholder resolution and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads and validates a configuration file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<ClientConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading client configuration");

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let format = ConfigFormat::from_path(path)?;

        let config = self.load_from_str(&content, format)?;
        debug!(
            server = config.server.as_ref().map(|s| s.host.as_str()).unwrap_or("-"),
            auto_reconnect = config.options.auto_reconnect,
            "Client configuration loaded"
        );
        Ok(config)
    }

    /// Parses and validates configuration content.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<ClientConfig> {
        let mut config: ClientConfig = if self.resolve_env_vars {
            parse_str(&resolve_env_placeholders(content)?, format)?
        } else {
            parse_str(content, format)?
        };

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut ClientConfig) -> ConfigResult<()> {
        let var = |name: &str| env::var(format!("{}_{}", self.env_prefix, name)).ok();

        if let Some(value) = var("AUTO_RECONNECT") {
            config.options.auto_reconnect = parse_bool(&value).ok_or_else(|| {
                ConfigError::validation(format!("{}_AUTO_RECONNECT", self.env_prefix), "expected a boolean")
            })?;
        }

        let host = var("HOST");
        let port = var("PORT");
        let user = var("USER");
        let password = var("PASSWORD");
        if host.is_none() && port.is_none() && user.is_none() && password.is_none() {
            return Ok(());
        }

        let server = config.server.get_or_insert_with(|| ServerConfig {
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
        });
        if let Some(host) = host {
            server.host = host;
        }
        if let Some(port) = port {
            server.port = port.parse().map_err(|_| {
                ConfigError::validation(format!("{}_PORT", self.env_prefix), "expected a port number")
            })?;
        }
        if let Some(user) = user {
            server.user = user;
        }
        if let Some(password) = password {
            server.password = password;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::parse(e.to_string()))
        }
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| ConfigError::parse(e.to_string())),
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::parse(e.to_string()))
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolves `${VAR}` and `${VAR:default}` placeholders.
///
/// A placeholder whose variable is unset and has no default is an error.
fn resolve_env_placeholders(content: &str) -> ConfigResult<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();

        let mut body = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            body.push(c);
        }

        if !closed {
            result.push_str("${");
            result.push_str(&body);
            continue;
        }

        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (body.as_str(), None),
        };

        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                return Err(ConfigError::MissingEnvVar {
                    name: name.to_string(),
                })
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimestampPrecision;
    use std::io::Write;

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env_prefix("RTDB_CONFIG_TEST_UNSET")
    }

    #[test]
    fn test_yaml_with_humantime() {
        let yaml = r#"
options:
  auto_reconnect: true
  recv_timeout: 30s
  connect_timeout: 0s
  server_precision: nanoseconds
reconnect:
  max_attempts: 5
  initial_delay: 250ms
server:
  host: localhost
  port: 6327
  user: reader
  password: secret
"#;
        let config = loader().load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert!(config.options.auto_reconnect);
        assert_eq!(config.options.recv_timeout, Duration::from_secs(30));
        assert_eq!(config.options.connect_deadline(), None);
        assert_eq!(config.options.send_timeout, Duration::from_secs(1));
        assert_eq!(config.options.server_precision, TimestampPrecision::Nanoseconds);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(250));

        let server = config.server.unwrap();
        assert_eq!(server.endpoint().unwrap().to_string(), "localhost:6327");
        assert_eq!(server.credentials().user(), "reader");
        assert!(!format!("{server:?}").contains("secret"));
    }

    #[test]
    fn test_toml_and_json() {
        let toml = r#"
[pipeline]
ingress_capacity = 64

[options]
send_timeout = "2s"
"#;
        let config = loader().load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.pipeline.ingress_capacity, 64);
        assert_eq!(config.options.send_timeout, Duration::from_secs(2));

        let json = r#"{ "reconnect": { "max_attempts": 3, "jitter": 0.0 } }"#;
        let config = loader().load_from_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.reconnect.max_attempts, 3);
        assert!(config.server.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let yaml = "pipeline:\n  ingress_capacity: 0\n";
        assert!(matches!(
            loader().load_from_str(yaml, ConfigFormat::Yaml),
            Err(ConfigError::Validation { .. })
        ));

        let yaml = "reconnect:\n  initial_delay: 10s\n  max_delay: 1s\n";
        assert!(matches!(
            loader().load_from_str(yaml, ConfigFormat::Yaml),
            Err(ConfigError::Validation { .. })
        ));

        let yaml = "options:\n  recv_timeout: 0s\n";
        assert!(loader().load_from_str(yaml, ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn test_placeholders() {
        std::env::set_var("RTDB_CONFIG_TEST_HOST", "db.example");
        let resolved =
            resolve_env_placeholders("host: ${RTDB_CONFIG_TEST_HOST}\nuser: ${RTDB_CONFIG_TEST_NOPE:reader}")
                .unwrap();
        assert_eq!(resolved, "host: db.example\nuser: reader");

        assert!(matches!(
            resolve_env_placeholders("password: ${RTDB_CONFIG_TEST_MISSING}"),
            Err(ConfigError::MissingEnvVar { .. })
        ));
        assert_eq!(resolve_env_placeholders("cost: ${unterminated").unwrap(), "cost: ${unterminated");
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("RTDB_OVERRIDE_TEST_HOST", "override.example");
        std::env::set_var("RTDB_OVERRIDE_TEST_PORT", "7000");
        std::env::set_var("RTDB_OVERRIDE_TEST_USER", "ops");

        let config = ConfigLoader::new()
            .with_env_prefix("RTDB_OVERRIDE_TEST")
            .load_from_str("{}", ConfigFormat::Json)
            .unwrap();
        let server = config.server.unwrap();
        assert_eq!(server.host, "override.example");
        assert_eq!(server.port, 7000);
        assert_eq!(server.user, "ops");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "options:\n  user_timeout: 5s").unwrap();
        let config = loader().load(file.path()).unwrap();
        assert_eq!(config.options.user_timeout, Duration::from_secs(5));

        assert!(matches!(
            loader().load("/nonexistent/rtdb.yaml"),
            Err(ConfigError::FileNotFound { .. })
        ));

        let other = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            loader().load(other.path()),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }
}
