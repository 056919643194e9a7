//! Centralized configuration for api-server.
//!
//! Configuration comes from a YAML file (see [`config_path`]) with a few
//! environment overrides, and is validated at startup to fail fast on
//! misconfiguration rather than at request time.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::HeaderValue;
use domain::registry::BackendConfig;
use serde::Deserialize;
use thiserror::Error;

/// `task_store` value selecting the in-memory repository.
pub const MEMORY_STORE: &str = "memory";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse_lenient(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("configuration error for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Application section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Debug logging.
    pub debug: bool,
    pub port: u16,
    pub log_format: LogFormat,
    /// Registry key of the backend serving tasks, or `memory`.
    pub task_store: String,
    /// Expiration window for tasks in the key-value store.
    pub task_ttl_secs: u64,
    /// Upper bound on graceful shutdown.
    pub shutdown_grace_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_allow_origin: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            port: 8080,
            log_format: LogFormat::Pretty,
            task_store: "postgres".into(),
            task_ttl_secs: 600,
            shutdown_grace_secs: 5,
            request_timeout_secs: 15,
            cors_allow_origin: "*".into(),
        }
    }
}

impl AppConfig {
    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// CORS origin as a header value. Checked by [`Config::validate`].
    pub fn cors_origin(&self) -> Result<HeaderValue, ConfigError> {
        HeaderValue::from_str(&self.cors_allow_origin).map_err(|e| {
            invalid(
                "app.cors_allow_origin",
                format!("invalid header value '{}': {}", self.cors_allow_origin, e),
            )
        })
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    /// Storage backends to register, in connection order.
    #[serde(default)]
    pub databases: Vec<BackendConfig>,
}

/// Resolve the configuration file path.
///
/// `TASKS_CONFIG` wins; otherwise `local-config.yaml` when `APP_ENV=local`,
/// else `config.yaml`, both relative to the working directory.
pub fn config_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup("TASKS_CONFIG").filter(|s| !s.is_empty()) {
        return PathBuf::from(path);
    }
    match lookup("APP_ENV") {
        Some(v) if v.eq_ignore_ascii_case("local") => PathBuf::from("local-config.yaml"),
        _ => PathBuf::from("config.yaml"),
    }
}

impl Config {
    /// Load, override from the environment and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let lookup = |key: &str| env::var(key).ok();
        let mut cfg = Self::from_file(config_path(lookup))?;
        cfg.apply_overrides(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse without validating.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `APP_PORT`, `APP_DEBUG`, `LOG_FORMAT` and `TASK_STORE`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(port) = lookup("APP_PORT") {
            self.app.port = port
                .trim()
                .parse()
                .map_err(|_| invalid("APP_PORT", format!("'{}' is not a port", port)))?;
        }
        if let Some(debug) = lookup("APP_DEBUG") {
            self.app.debug = matches!(debug.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.app.log_format = LogFormat::parse_lenient(&format);
        }
        if let Some(store) = lookup("TASK_STORE").filter(|s| !s.is_empty()) {
            self.app.task_store = store;
        }
        Ok(())
    }

    /// Reject configurations that cannot start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let app = &self.app;
        if app.port == 0 {
            return Err(invalid("app.port", "must be non-zero"));
        }
        if app.task_ttl_secs == 0 {
            return Err(invalid("app.task_ttl_secs", "must be positive"));
        }
        if app.shutdown_grace_secs == 0 {
            return Err(invalid("app.shutdown_grace_secs", "must be positive"));
        }
        if app.request_timeout_secs == 0 {
            return Err(invalid("app.request_timeout_secs", "must be positive"));
        }
        app.cors_origin()?;

        for db in &self.databases {
            if db.kind.trim().is_empty() {
                return Err(invalid("databases.type", "must not be empty"));
            }
            if db.host.trim().is_empty() {
                return Err(invalid(
                    "databases.host",
                    format!("missing for {}", db.registry_key()),
                ));
            }
            if db.port == 0 {
                return Err(invalid(
                    "databases.port",
                    format!("must be non-zero for {}", db.registry_key()),
                ));
            }
        }

        if app.task_store != MEMORY_STORE && self.databases.is_empty() {
            return Err(invalid(
                "databases",
                format!("at least one backend is required unless task_store is '{MEMORY_STORE}'"),
            ));
        }
        if app.task_store != MEMORY_STORE
            && !self
                .databases
                .iter()
                .any(|db| db.registry_key() == app.task_store)
        {
            return Err(invalid(
                "app.task_store",
                format!(
                    "'{}' is neither '{}' nor a declared database",
                    app.task_store, MEMORY_STORE
                ),
            ));
        }
        Ok(())
    }

    /// Log warnings about permissive configuration.
    pub fn warn_if_insecure(&self) {
        if self.app.cors_allow_origin == "*" {
            tracing::warn!("cors_allow_origin is '*': any origin may call the API");
        }
        if self.app.task_store == MEMORY_STORE {
            tracing::warn!("task_store=memory: tasks are lost on restart");
        }
        for db in self.databases.iter().filter(|db| db.password.is_empty()) {
            tracing::warn!(backend = %db.registry_key(), "backend configured without a password");
        }
    }
}
