//! redis-adapter: key-value storage backend for the task service.
//!
//! - [`RedisAdapter`] owns a redis `ConnectionManager` and implements the
//!   registry's [`Adapter`] capability.
//! - [`RedisClient`] is the shareable native handle handed to repositories.
//!   Once the adapter is closed every clone refuses new commands instead of
//!   reusing the released connection.
//! - [`RedisTaskRepo`] stores one key per task with a configurable TTL.
//! - [`RedisRegistryExt`] is the typed "get the key-value client" accessor.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use domain::registry::{Adapter, AdapterError, BackendConfig, Registry, RegistryError};
use redis::aio::ConnectionManager;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tokio::sync::RwLock;
use tracing::info;

mod repo;

pub use repo::RedisTaskRepo;

/// Factory kind and default registry key.
pub const REDIS_KIND: &str = "redis";

/// Shareable handle to a Redis connection owned by a [`RedisAdapter`].
#[derive(Clone)]
pub struct RedisClient {
    conn: Arc<RwLock<Option<ConnectionManager>>>,
}

impl RedisClient {
    fn disconnected() -> Self {
        Self {
            conn: Arc::new(RwLock::new(None)),
        }
    }

    /// Wrap an already established connection manager.
    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self {
            conn: Arc::new(RwLock::new(Some(manager))),
        }
    }

    /// Connection for issuing commands. Fails once the adapter is closed.
    pub async fn connection(&self) -> Result<ConnectionManager, AdapterError> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or(AdapterError::NotConnected(REDIS_KIND))
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }
}

/// Key-value adapter over a Redis connection manager.
pub struct RedisAdapter {
    config: BackendConfig,
    client: RedisClient,
}

impl RedisAdapter {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            client: RedisClient::disconnected(),
        }
    }

    /// Registry factory for the `redis` kind.
    pub fn factory(config: &BackendConfig) -> Box<dyn Adapter> {
        Box::new(Self::new(config.clone()))
    }

    /// Connection info derived from the declaration. `name` selects the
    /// database index and defaults to 0.
    pub fn connection_info(&self) -> Result<ConnectionInfo, AdapterError> {
        let c = &self.config;
        let db = if c.name.trim().is_empty() {
            0
        } else {
            c.name.trim().parse::<i64>().map_err(|_| {
                AdapterError::Connection(format!("invalid redis database index '{}'", c.name))
            })?
        };
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(c.host.clone(), c.port),
            redis: RedisConnectionInfo {
                db,
                username: non_empty(&c.user),
                password: non_empty(&c.password),
                ..Default::default()
            },
        })
    }

    pub fn client(&self) -> RedisClient {
        self.client.clone()
    }
}

#[async_trait]
impl Adapter for RedisAdapter {
    fn kind(&self) -> &'static str {
        REDIS_KIND
    }

    async fn connect(&mut self) -> Result<(), AdapterError> {
        if self.client.is_connected().await {
            return Err(AdapterError::Connection("already connected".into()));
        }
        let client = redis::Client::open(self.connection_info()?)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<String>(&mut manager)
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        info!(host = %self.config.host, port = self.config.port, "redis connection ready");
        *self.client.conn.write().await = Some(manager);
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        // The socket is released when the last outstanding clone drops.
        match self.client.conn.write().await.take() {
            Some(_) => Ok(()),
            None => Err(AdapterError::NotConnected(REDIS_KIND)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Typed access to the key-value client held by a [`Registry`].
pub trait RedisRegistryExt {
    fn redis_client(&self, key: &str) -> Result<RedisClient, RegistryError>;
}

impl RedisRegistryExt for Registry {
    fn redis_client(&self, key: &str) -> Result<RedisClient, RegistryError> {
        Ok(self.get_as::<RedisAdapter>(key)?.client())
    }
}
