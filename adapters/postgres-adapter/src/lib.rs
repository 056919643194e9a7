//! postgres-adapter: relational storage backend for the task service.
//!
//! - [`PostgresAdapter`] owns a sqlx `PgPool` and implements the registry's
//!   [`Adapter`] capability (connect on startup, close on shutdown).
//! - [`PostgresTaskRepo`] implements the `TaskRepository` port against the
//!   `tasks` table using the pool handed out by the adapter.
//! - [`PostgresRegistryExt`] is the typed "get the relational client"
//!   accessor on [`Registry`].
//!
//! Pool sizing follows sqlx defaults.

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use domain::registry::{Adapter, AdapterError, BackendConfig, Registry, RegistryError};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

mod repo;

pub use repo::PostgresTaskRepo;

/// Factory kind and default registry key.
pub const POSTGRES_KIND: &str = "postgres";

/// Relational adapter over a Postgres connection pool.
pub struct PostgresAdapter {
    config: BackendConfig,
    acquire_timeout: Option<Duration>,
    pool: Option<PgPool>,
}

impl PostgresAdapter {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            acquire_timeout: None,
            pool: None,
        }
    }

    /// Bound how long `connect` (and later acquires) wait for a connection.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Registry factory for the `postgres` kind.
    pub fn factory(config: &BackendConfig) -> Box<dyn Adapter> {
        Box::new(Self::new(config.clone()))
    }

    /// Connection options derived from the backend declaration. Empty
    /// credential fields are left to libpq-style defaults.
    pub fn connect_options(&self) -> PgConnectOptions {
        let c = &self.config;
        let mut opts = PgConnectOptions::new().host(&c.host).port(c.port);
        if !c.user.is_empty() {
            opts = opts.username(&c.user);
        }
        if !c.password.is_empty() {
            opts = opts.password(&c.password);
        }
        if !c.name.is_empty() {
            opts = opts.database(&c.name);
        }
        opts
    }

    /// Shared pool handle. Clones refer to the same pool.
    pub fn pool(&self) -> Result<PgPool, AdapterError> {
        self.pool
            .clone()
            .ok_or(AdapterError::NotConnected(POSTGRES_KIND))
    }
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn kind(&self) -> &'static str {
        POSTGRES_KIND
    }

    async fn connect(&mut self) -> Result<(), AdapterError> {
        if self.pool.is_some() {
            return Err(AdapterError::Connection("already connected".into()));
        }
        let mut options = PgPoolOptions::new();
        if let Some(timeout) = self.acquire_timeout {
            options = options.acquire_timeout(timeout);
        }
        let pool = options
            .connect_with(self.connect_options())
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        info!(host = %self.config.host, port = self.config.port, database = %self.config.name, "postgres pool ready");
        self.pool = Some(pool);
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or(AdapterError::NotConnected(POSTGRES_KIND))?;
        // Waits for checked-out connections to be returned.
        pool.close().await;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Typed access to the relational client held by a [`Registry`].
pub trait PostgresRegistryExt {
    fn postgres_pool(&self, key: &str) -> Result<PgPool, RegistryError>;
}

impl PostgresRegistryExt for Registry {
    fn postgres_pool(&self, key: &str) -> Result<PgPool, RegistryError> {
        Ok(self.get_as::<PostgresAdapter>(key)?.pool()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::registry::AdapterFactories;

    fn cfg() -> BackendConfig {
        let mut c = BackendConfig::new(POSTGRES_KIND, "db.internal", 5433);
        c.user = "app".into();
        c.password = "secret".into();
        c.name = "tasks".into();
        c
    }

    #[test]
    fn connect_options_follow_declaration() {
        let opts = PostgresAdapter::new(cfg()).connect_options();
        assert_eq!(opts.get_host(), "db.internal");
        assert_eq!(opts.get_port(), 5433);
        assert_eq!(opts.get_username(), "app");
        assert_eq!(opts.get_database(), Some("tasks"));
    }

    #[test]
    fn pool_before_connect_is_not_connected() {
        let adapter = PostgresAdapter::new(cfg());
        assert!(matches!(
            adapter.pool(),
            Err(AdapterError::NotConnected(POSTGRES_KIND))
        ));
    }

    #[tokio::test]
    async fn close_before_connect_fails() {
        let adapter = PostgresAdapter::new(cfg());
        assert!(adapter.close().await.is_err());
    }

    #[tokio::test]
    async fn unreachable_server_makes_build_fail() {
        let mut factories = AdapterFactories::new();
        factories.register(POSTGRES_KIND, |c: &BackendConfig| {
            Box::new(PostgresAdapter::new(c.clone()).with_acquire_timeout(Duration::from_millis(500)))
                as Box<dyn Adapter>
        });
        let unreachable = BackendConfig::new(POSTGRES_KIND, "127.0.0.1", 1);
        let err = Registry::build(&[unreachable], &factories)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::BackendUnavailable { ref key, .. } if key == POSTGRES_KIND
        ));
    }

    #[tokio::test]
    async fn accessor_requires_registration() {
        let registry = Registry::build(&[], &AdapterFactories::new()).await.unwrap();
        assert!(matches!(
            registry.postgres_pool(POSTGRES_KIND),
            Err(RegistryError::NotRegistered(_))
        ));
    }
}
