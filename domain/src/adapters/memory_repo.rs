use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Clock, CoreError, SystemClock, Task, TaskId, TaskRepository, TaskRequest};

/// Simple in-memory repository for tests and local runs. Not built for high
/// concurrency beyond the internal mutex guarding the map.
pub struct InMemoryTaskRepo {
    inner: Mutex<Inner>,
    clock: Box<dyn Clock>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    tasks: BTreeMap<u64, Task>,
}

impl InMemoryTaskRepo {
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn key(id: &TaskId) -> Option<u64> {
        id.as_str().parse().ok()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, CoreError> {
        self.inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }
}

impl Default for InMemoryTaskRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepo {
    async fn save(&self, task: &TaskRequest) -> Result<Task, CoreError> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let key = inner.next_id;
        let stored = Task::new(
            TaskId::new(key.to_string())?,
            task.name.clone(),
            task.is_done(),
            now,
        );
        inner.tasks.insert(key, stored.clone());
        Ok(stored)
    }

    async fn find_all(&self) -> Result<Vec<Task>, CoreError> {
        let inner = self.lock()?;
        Ok(inner.tasks.values().cloned().collect())
    }

    async fn update(&self, id: &TaskId, task: &TaskRequest) -> Result<Task, CoreError> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        let stored = Self::key(id)
            .and_then(|k| inner.tasks.get_mut(&k))
            .ok_or(CoreError::NotFound)?;
        stored.name = task.name.clone();
        stored.done = task.is_done();
        stored.updated_at = now;
        Ok(stored.clone())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        match Self::key(id).and_then(|k| inner.tasks.remove(&k)) {
            Some(_) => Ok(()),
            None => Err(CoreError::NotFound),
        }
    }
}
