use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{CoreError, Task, TaskId, TaskRepository, TaskRequest};
use sqlx::postgres::PgPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    localized_name TEXT,
    done BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at TIMESTAMPTZ
)
"#;

const COLUMNS: &str = "id, name, localized_name, done, created_at, updated_at, deleted_at";

/// Postgres-backed task repository.
///
/// `find_all` is a full scan of `tasks`; soft-deleted rows are returned like
/// live ones.
#[derive(Clone)]
pub struct PostgresTaskRepo {
    pool: PgPool,
}

impl PostgresTaskRepo {
    /// Wrap a pool and make sure the `tasks` table exists.
    pub async fn new(pool: PgPool) -> Result<Self, CoreError> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CoreError::repository("ensure tasks schema", e))?;
        Ok(Self { pool })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    name: String,
    localized_name: Option<String>,
    done: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: TaskId::new(row.id.to_string())?,
            name: row.name,
            localized_name: row.localized_name,
            done: row.done,
            created_at: SystemTime::from(row.created_at),
            updated_at: SystemTime::from(row.updated_at),
            deleted_at: row.deleted_at.map(SystemTime::from),
        })
    }
}

fn row_id(id: &TaskId) -> Result<i64, CoreError> {
    id.as_str()
        .parse::<i64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| CoreError::InvalidTaskId(format!("'{}' is not a numeric id", id)))
}

#[async_trait]
impl TaskRepository for PostgresTaskRepo {
    async fn save(&self, task: &TaskRequest) -> Result<Task, CoreError> {
        let sql = format!("INSERT INTO tasks (name, done) VALUES ($1, $2) RETURNING {COLUMNS}");
        let row: TaskRow = sqlx::query_as(&sql)
            .bind(&task.name)
            .bind(task.is_done())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::repository("save task", e))?;
        row.try_into()
    }

    async fn find_all(&self) -> Result<Vec<Task>, CoreError> {
        let sql = format!("SELECT {COLUMNS} FROM tasks ORDER BY id");
        let rows: Vec<TaskRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::repository("list tasks", e))?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn update(&self, id: &TaskId, task: &TaskRequest) -> Result<Task, CoreError> {
        let row_id = row_id(id)?;
        let sql = format!(
            "UPDATE tasks SET name = $1, done = $2, updated_at = NOW() WHERE id = $3 RETURNING {COLUMNS}"
        );
        let row: Option<TaskRow> = sqlx::query_as(&sql)
            .bind(&task.name)
            .bind(task.is_done())
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::repository("update task", e))?;
        row.ok_or(CoreError::NotFound)?.try_into()
    }

    async fn delete(&self, id: &TaskId) -> Result<(), CoreError> {
        let row_id = row_id(id)?;
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(row_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::repository("delete task", e))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn row_id_accepts_positive_integers_only() {
        assert_eq!(row_id(&TaskId::new("17").unwrap()).unwrap(), 17);
        assert!(matches!(
            row_id(&TaskId::new("abc").unwrap()),
            Err(CoreError::InvalidTaskId(_))
        ));
        assert!(row_id(&TaskId::new("0").unwrap()).is_err());
    }

    #[test]
    fn row_converts_timestamps() {
        let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let row = TaskRow {
            id: 7,
            name: "x".into(),
            localized_name: Some("ایکس".into()),
            done: false,
            created_at: created,
            updated_at: created,
            deleted_at: Some(created),
        };
        let task = Task::try_from(row).unwrap();
        assert_eq!(task.id.as_str(), "7");
        assert_eq!(task.created_at, SystemTime::from(created));
        assert_eq!(task.deleted_at, Some(SystemTime::from(created)));
    }

    // Runs against a live server when TEST_DATABASE_URL is set.
    async fn live_repo() -> Option<PostgresTaskRepo> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect test database");
        Some(PostgresTaskRepo::new(pool).await.expect("schema"))
    }

    #[tokio::test]
    async fn save_then_find_all_round_trips() {
        let Some(repo) = live_repo().await else {
            return;
        };
        let saved = repo.save(&TaskRequest::new("pg round trip")).await.unwrap();
        let all = repo.find_all().await.unwrap();
        let found = all.iter().find(|t| t.id == saved.id).expect("saved task listed");
        assert_eq!(found.name, "pg round trip");
        assert!(!found.done);

        let updated = repo
            .update(&saved.id, &TaskRequest::new("pg renamed"))
            .await
            .unwrap();
        assert_eq!(updated.name, "pg renamed");

        repo.delete(&saved.id).await.unwrap();
        assert!(matches!(repo.delete(&saved.id).await, Err(CoreError::NotFound)));
    }
}
