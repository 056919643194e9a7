//! Composition root: configuration to registry to repository to service to
//! HTTP server, and the reverse on shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use domain::adapters::memory_repo::InMemoryTaskRepo;
use domain::registry::{AdapterFactories, CloseAllError, Registry, RegistryError};
use domain::{CoreError, TaskRepository};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::{Config, ConfigError, MEMORY_STORE};
use crate::handler::{self, AppState};
use crate::server::HttpServer;
use crate::telemetry::EventLog;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to load database registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("backend '{key}' of kind '{kind}' cannot serve tasks")]
    UnsupportedStore { key: String, kind: String },
    #[error("failed to prepare task repository: {0}")]
    Repository(#[from] CoreError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Close(#[from] CloseAllError),
}

/// Factories for every backend kind compiled into this binary.
#[allow(unused_mut)]
pub fn builtin_factories() -> AdapterFactories {
    let mut factories = AdapterFactories::new();
    #[cfg(feature = "postgres")]
    factories.register(
        postgres_adapter::POSTGRES_KIND,
        postgres_adapter::PostgresAdapter::factory,
    );
    #[cfg(feature = "redis")]
    factories.register(redis_adapter::REDIS_KIND, redis_adapter::RedisAdapter::factory);
    factories
}

/// Build the repository selected by `app.task_store` over the registry.
pub async fn build_task_repo(
    config: &Config,
    registry: &Registry,
) -> Result<Arc<dyn TaskRepository>, AppError> {
    let key = config.app.task_store.as_str();
    if key == MEMORY_STORE {
        return Ok(Arc::new(InMemoryTaskRepo::new()));
    }
    let kind = registry.get(key)?.kind();
    match kind {
        #[cfg(feature = "postgres")]
        postgres_adapter::POSTGRES_KIND => {
            use postgres_adapter::PostgresRegistryExt;
            let pool = registry.postgres_pool(key)?;
            Ok(Arc::new(postgres_adapter::PostgresTaskRepo::new(pool).await?))
        }
        #[cfg(feature = "redis")]
        redis_adapter::REDIS_KIND => {
            use redis_adapter::RedisRegistryExt;
            let client = registry.redis_client(key)?;
            Ok(Arc::new(redis_adapter::RedisTaskRepo::new(
                client,
                config.app.task_ttl(),
            )))
        }
        other => Err(AppError::UnsupportedStore {
            key: key.to_string(),
            kind: other.to_string(),
        }),
    }
}

pub struct App {
    config: Config,
    registry: Registry,
    state: AppState,
}

impl App {
    pub async fn initialize(config: Config, events: &EventLog) -> Result<Self, AppError> {
        Self::initialize_with(config, &builtin_factories(), events).await
    }

    /// Connect every declared backend and wire the task service.
    pub async fn initialize_with(
        config: Config,
        factories: &AdapterFactories,
        events: &EventLog,
    ) -> Result<Self, AppError> {
        let registry = match Registry::build(&config.databases, factories).await {
            Ok(registry) => {
                events.log_success("load_db_registry");
                registry
            }
            Err(e) => {
                events.log_once("err_load_db_registry", &e);
                return Err(e.into());
            }
        };
        info!(count = registry.len(), backends = ?registry.keys(), task_store = %config.app.task_store, "database registry ready");

        let repo = match build_task_repo(&config, &registry).await {
            Ok(repo) => repo,
            Err(e) => {
                if let Err(close) = registry.close_all().await {
                    error!(err = %close, "failed to release backends after startup error");
                }
                return Err(e);
            }
        };
        Ok(Self::from_parts(config, registry, repo))
    }

    pub fn from_parts(config: Config, registry: Registry, repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            config,
            registry,
            state: AppState::new(repo),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn router(&self) -> Result<Router, ConfigError> {
        handler::router(self.state.clone(), &self.config.app)
    }

    /// Bind `0.0.0.0:{port}` and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.app.port).into();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.stop().await?;
                return Err(e.into());
            }
        };
        info!(%addr, "api-server listening");
        self.serve(listener, shutdown).await
    }

    /// Serve on `listener`; backends are closed only after the server has
    /// stopped and every request has finished.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = match self.router() {
            Ok(router) => router,
            Err(e) => {
                self.stop().await?;
                return Err(e.into());
            }
        };
        let server = HttpServer::new(router, self.config.app.shutdown_grace());
        let served = server.serve(listener, shutdown).await;
        let closed = self.stop().await;
        served?;
        closed?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), CloseAllError> {
        if self.registry.is_empty() {
            return Ok(());
        }
        match self.registry.close_all().await {
            Ok(()) => {
                info!("database connections closed successfully");
                Ok(())
            }
            Err(e) => {
                error!(err = %e, "error closing database connections");
                Err(e)
            }
        }
    }
}
