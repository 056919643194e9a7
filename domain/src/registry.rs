//! Database registry: connected storage adapters keyed by name.
//!
//! The registry is built once at startup from the configured backend
//! declarations. Each declaration is turned into an [`Adapter`] by the
//! factory registered for its kind, connected, and stored under its
//! registry key. After construction the map is read-only; the only mutation
//! is [`Registry::close_all`] at shutdown, which must run after the HTTP
//! server has drained.
//!
//! Adapters expose their native client (a connection pool, a Redis
//! connection manager) to the repository layer. The registry multiplexes
//! connections; it is not a query abstraction.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

/// A connect/close capability over one concrete storage backend.
///
/// `connect` is called exactly once, before the adapter is inserted into a
/// registry. `close` is called at most once per registry lifetime.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Backend kind this adapter was built for, e.g. `"postgres"`.
    fn kind(&self) -> &'static str;

    async fn connect(&mut self) -> Result<(), AdapterError>;

    async fn close(&self) -> Result<(), AdapterError>;

    /// Downcast hook for typed accessors.
    fn as_any(&self) -> &dyn Any;
}

/// Errors raised by a single adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("close error: {0}")]
    Close(String),
    #[error("{0} adapter is not connected")]
    NotConnected(&'static str),
}

/// Errors raised while building or querying a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unsupported backend type: {0}")]
    UnsupportedBackend(String),
    #[error("backend key declared more than once: {0}")]
    DuplicateBackend(String),
    #[error("failed to connect to {key}: {source}")]
    BackendUnavailable {
        key: String,
        #[source]
        source: AdapterError,
    },
    #[error("backend {0} not registered")]
    NotRegistered(String),
    #[error("backend {key} is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Every failure observed by [`Registry::close_all`].
#[derive(Debug, Error)]
#[error("failed to close {} backend(s): {}", .failures.len(), summarize(.failures))]
pub struct CloseAllError {
    pub failures: Vec<(String, AdapterError)>,
}

fn summarize(failures: &[(String, AdapterError)]) -> String {
    failures
        .iter()
        .map(|(key, err)| format!("{key} ({err})"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One backend declaration from configuration.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    /// Factory kind, e.g. `postgres` or `redis`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Registry key; defaults to `kind`.
    #[serde(default)]
    pub key: Option<String>,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Database name (Postgres) or database index (Redis).
    #[serde(default)]
    pub name: String,
}

impl BackendConfig {
    pub fn new(kind: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: kind.into(),
            key: None,
            host: host.into(),
            port,
            user: String::new(),
            password: String::new(),
            name: String::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn registry_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.kind)
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

/// Builds an unconnected adapter from a declaration.
pub type AdapterFactory = Arc<dyn Fn(&BackendConfig) -> Box<dyn Adapter> + Send + Sync>;

/// Named adapter factories keyed by backend kind.
///
/// New backends are added by registering a factory; the registry itself
/// never switches on kind names.
#[derive(Clone, Default)]
pub struct AdapterFactories {
    by_kind: HashMap<String, AdapterFactory>,
}

impl AdapterFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&BackendConfig) -> Box<dyn Adapter> + Send + Sync + 'static,
    {
        self.by_kind.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.by_kind.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    fn create(&self, cfg: &BackendConfig) -> Result<Box<dyn Adapter>, RegistryError> {
        let factory = self
            .by_kind
            .get(&cfg.kind)
            .ok_or_else(|| RegistryError::UnsupportedBackend(cfg.kind.clone()))?;
        Ok(factory(cfg))
    }
}

/// Process-lifetime collection of connected adapters.
pub struct Registry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl Registry {
    /// Construct and connect every declared backend.
    ///
    /// All declarations are checked (known kind, unique key) before any
    /// connection is attempted. If a backend fails to connect, the adapters
    /// already connected by this call are closed and the error is returned;
    /// a partial registry never escapes.
    pub async fn build(
        configs: &[BackendConfig],
        factories: &AdapterFactories,
    ) -> Result<Self, RegistryError> {
        let mut keys = HashSet::new();
        for cfg in configs {
            if !factories.supports(&cfg.kind) {
                error!(kind = %cfg.kind, supported = ?factories.kinds(), "unsupported backend kind");
                return Err(RegistryError::UnsupportedBackend(cfg.kind.clone()));
            }
            if !keys.insert(cfg.registry_key()) {
                return Err(RegistryError::DuplicateBackend(
                    cfg.registry_key().to_string(),
                ));
            }
        }

        let mut connected: Vec<(String, Arc<dyn Adapter>)> = Vec::with_capacity(configs.len());
        for cfg in configs {
            let key = cfg.registry_key().to_string();
            let mut adapter = factories.create(cfg)?;
            if let Err(source) = adapter.connect().await {
                error!(backend = %key, kind = %cfg.kind, err = %source, "backend connect failed");
                release(&connected).await;
                return Err(RegistryError::BackendUnavailable { key, source });
            }
            info!(backend = %key, kind = %cfg.kind, host = %cfg.host, port = cfg.port, "backend connected");
            connected.push((key, Arc::from(adapter)));
        }

        Ok(Self {
            adapters: connected.into_iter().collect(),
        })
    }

    /// Look up an adapter by registry key.
    pub fn get(&self, key: &str) -> Result<Arc<dyn Adapter>, RegistryError> {
        self.adapters
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(key.to_string()))
    }

    /// Look up an adapter and downcast it to its concrete type.
    pub fn get_as<T: Adapter>(&self, key: &str) -> Result<&T, RegistryError> {
        let adapter = self
            .adapters
            .get(key)
            .ok_or_else(|| RegistryError::NotRegistered(key.to_string()))?;
        adapter
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| RegistryError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Close every adapter, collecting all failures.
    pub async fn close_all(&self) -> Result<(), CloseAllError> {
        let mut failures = Vec::new();
        for key in self.keys() {
            let Some(adapter) = self.adapters.get(key) else {
                continue;
            };
            match adapter.close().await {
                Ok(()) => info!(backend = %key, "backend closed"),
                Err(e) => {
                    error!(backend = %key, err = %e, "backend close failed");
                    failures.push((key.to_string(), e));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseAllError { failures })
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("backends", &self.keys())
            .finish()
    }
}

// Best-effort cleanup after a failed build.
async fn release(connected: &[(String, Arc<dyn Adapter>)]) {
    for (key, adapter) in connected {
        if let Err(e) = adapter.close().await {
            warn!(backend = %key, err = %e, "close after failed build");
        }
    }
}
