//! Domain library for the task service.
//!
//! Holds the task types, the repository port (trait), the application
//! service and the database registry that wires storage backends behind one
//! interface. Concrete backends (Postgres, Redis) live in the adapter crates;
//! keep their drivers out of this crate.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Identifier of a stored task.
///
/// Backends choose the representation: the relational store uses numeric
/// ids, the key-value store uses counter-generated ids. The HTTP layer only
/// ever sees the string form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(String);

impl TaskId {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.trim().is_empty() {
            return Err(CoreError::InvalidTaskId("empty".into()));
        }
        if !val
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidTaskId(format!(
                "invalid characters in '{}'",
                val
            )));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Optional translated display name.
    pub localized_name: Option<String>,
    pub done: bool,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    /// Soft delete timestamp. Listing does not filter on it.
    pub deleted_at: Option<SystemTime>,
}

impl Task {
    /// Create a fresh task with both timestamps set to `now`.
    pub fn new(id: TaskId, name: String, done: bool, now: SystemTime) -> Self {
        Self {
            id,
            name,
            localized_name: None,
            done,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Input for creating or updating a task.
///
/// `done` may be omitted; when present it must be `false`. See
/// [`validate::validate_task_request`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    #[serde(default)]
    pub done: Option<bool>,
}

impl TaskRequest {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            done: None,
        }
    }

    /// Effective completion flag.
    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Repository port for persisting and loading tasks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a new task and return it as persisted.
    async fn save(&self, task: &TaskRequest) -> Result<Task, CoreError>;
    /// Return every stored task. No pagination.
    async fn find_all(&self) -> Result<Vec<Task>, CoreError>;
    /// Replace name and done flag of an existing task.
    async fn update(&self, id: &TaskId, task: &TaskRequest) -> Result<Task, CoreError>;
    async fn delete(&self, id: &TaskId) -> Result<(), CoreError>;
}

#[async_trait]
impl<T: TaskRepository + ?Sized> TaskRepository for Arc<T> {
    async fn save(&self, task: &TaskRequest) -> Result<Task, CoreError> {
        (**self).save(task).await
    }

    async fn find_all(&self) -> Result<Vec<Task>, CoreError> {
        (**self).find_all().await
    }

    async fn update(&self, id: &TaskId, task: &TaskRequest) -> Result<Task, CoreError> {
        (**self).update(id, task).await
    }

    async fn delete(&self, id: &TaskId) -> Result<(), CoreError> {
        (**self).delete(id).await
    }
}

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid task id: {0}")]
    InvalidTaskId(String),
    #[error("not found")]
    NotFound,
    #[error("repository error: {0}")]
    Repository(String),
}

impl CoreError {
    /// Wrap a backend failure with the operation it interrupted.
    pub fn repository(op: &str, err: impl std::fmt::Display) -> Self {
        CoreError::Repository(format!("{op}: {err}"))
    }
}

pub mod adapters;
pub mod registry;
pub mod service;
pub mod validate;
