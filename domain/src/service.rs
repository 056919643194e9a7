use tracing::{error, info};

use crate::validate::validate_task_request;
use crate::{CoreError, Task, TaskId, TaskRepository, TaskRequest};

/// Application service between the HTTP layer and the repository port.
///
/// Validates input and logs outcomes; persistence is delegated verbatim to
/// the repository. Business rules belong here rather than in handlers or
/// adapters.
pub struct TaskService<R: TaskRepository> {
    repo: R,
}

impl<R: TaskRepository> TaskService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Validate and store a new task.
    pub async fn create_task(&self, req: &TaskRequest) -> Result<Task, CoreError> {
        validate_task_request(req)?;
        match self.repo.save(req).await {
            Ok(task) => {
                info!(task_id = %task.id, "task created");
                Ok(task)
            }
            Err(e) => {
                error!(err = %e, "failed to create task");
                Err(e)
            }
        }
    }

    /// List every stored task.
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>, CoreError> {
        match self.repo.find_all().await {
            Ok(tasks) => {
                info!(count = tasks.len(), "tasks listed");
                Ok(tasks)
            }
            Err(e) => {
                error!(err = %e, "failed to list tasks");
                Err(e)
            }
        }
    }

    pub async fn update_task(&self, id: &TaskId, req: &TaskRequest) -> Result<Task, CoreError> {
        validate_task_request(req)?;
        match self.repo.update(id, req).await {
            Ok(task) => {
                info!(task_id = %id, "task updated");
                Ok(task)
            }
            Err(e) => {
                error!(task_id = %id, err = %e, "failed to update task");
                Err(e)
            }
        }
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<(), CoreError> {
        match self.repo.delete(id).await {
            Ok(()) => {
                info!(task_id = %id, "task deleted");
                Ok(())
            }
            Err(e) => {
                error!(task_id = %id, err = %e, "failed to delete task");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_repo::InMemoryTaskRepo;
    use crate::Clock;
    use std::time::SystemTime;

    struct TestClock;
    impl Clock for TestClock {
        fn now(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH
        }
    }

    fn service() -> TaskService<InMemoryTaskRepo> {
        TaskService::new(InMemoryTaskRepo::with_clock(Box::new(TestClock)))
    }

    #[tokio::test]
    async fn create_then_list_round_trips_fields() {
        let svc = service();
        let created = svc.create_task(&TaskRequest::new("buy milk")).await.unwrap();
        assert_eq!(created.name, "buy milk");
        assert!(!created.done);

        let all = svc.get_all_tasks().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, created.id);
        assert_eq!(all[0].name, "buy milk");
        assert!(!all[0].done);
    }

    #[tokio::test]
    async fn create_rejects_done_true_before_touching_repo() {
        let svc = service();
        let req = TaskRequest {
            name: "x".into(),
            done: Some(true),
        };
        let err = svc.create_task(&req).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        assert!(svc.get_all_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_missing_task_is_not_found() {
        let svc = service();
        let id = TaskId::new("999").unwrap();
        let err = svc
            .update_task(&id, &TaskRequest::new("renamed"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[tokio::test]
    async fn update_and_delete_flow() {
        let svc = service();
        let created = svc.create_task(&TaskRequest::new("draft")).await.unwrap();

        let updated = svc
            .update_task(&created.id, &TaskRequest::new("final"))
            .await
            .unwrap();
        assert_eq!(updated.name, "final");

        svc.delete_task(&created.id).await.unwrap();
        assert!(svc.get_all_tasks().await.unwrap().is_empty());
        assert!(matches!(
            svc.delete_task(&created.id).await,
            Err(CoreError::NotFound)
        ));
    }
}
