use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use domain::{CoreError, Task, TaskId, TaskRepository, TaskRequest};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RedisClient;

const ITEM_PREFIX: &str = "task:item:";
const INDEX_KEY: &str = "task:meta:ids";
const NEXT_ID_KEY: &str = "task:meta:next_id";

/// Default expiration window for stored tasks.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Redis-backed task repository.
///
/// Every operation addresses the same per-task key (`task:item:{id}`); ids
/// come from an `INCR` counter and the set `task:meta:ids` indexes live tasks
/// for `find_all`. Each write refreshes the TTL, so tasks expire after the
/// configured window without activity.
#[derive(Clone)]
pub struct RedisTaskRepo {
    client: RedisClient,
    ttl: Duration,
}

impl RedisTaskRepo {
    pub fn new(client: RedisClient, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

/// Ids are only ever issued by the counter, so anything else is rejected
/// before it reaches a key.
fn item_id(id: &TaskId) -> Result<u64, CoreError> {
    id.as_str()
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| CoreError::InvalidTaskId(format!("'{}' is not a numeric id", id)))
}

fn task_key(id: u64) -> String {
    format!("{ITEM_PREFIX}{id}")
}

/// `SET key value EX ttl XX`: replaces the value only while the key exists.
fn set_existing(key: &str, payload: &str, ttl_secs: u64) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(payload).arg("EX").arg(ttl_secs).arg("XX");
    cmd
}

/// Serialized form of a task. Timestamps are milliseconds since UNIX_EPOCH.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTask {
    id: String,
    name: String,
    #[serde(default)]
    localized_name: Option<String>,
    done: bool,
    created_at: u64,
    updated_at: u64,
    #[serde(default)]
    deleted_at: Option<u64>,
}

fn system_time_to_millis(t: SystemTime) -> u64 {
    let millis = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn millis_to_system_time(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Current time at storage precision, so returned tasks equal listed ones.
fn now() -> SystemTime {
    millis_to_system_time(system_time_to_millis(SystemTime::now()))
}

impl From<&Task> for StoredTask {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.as_str().to_string(),
            name: t.name.clone(),
            localized_name: t.localized_name.clone(),
            done: t.done,
            created_at: system_time_to_millis(t.created_at),
            updated_at: system_time_to_millis(t.updated_at),
            deleted_at: t.deleted_at.map(system_time_to_millis),
        }
    }
}

impl TryFrom<StoredTask> for Task {
    type Error = CoreError;

    fn try_from(s: StoredTask) -> Result<Self, Self::Error> {
        Ok(Task {
            id: TaskId::new(s.id)?,
            name: s.name,
            localized_name: s.localized_name,
            done: s.done,
            created_at: millis_to_system_time(s.created_at),
            updated_at: millis_to_system_time(s.updated_at),
            deleted_at: s.deleted_at.map(millis_to_system_time),
        })
    }
}

fn encode(op: &str, task: &Task) -> Result<String, CoreError> {
    serde_json::to_string(&StoredTask::from(task)).map_err(|e| CoreError::repository(op, e))
}

fn decode(op: &str, raw: &str) -> Result<Task, CoreError> {
    let stored: StoredTask = serde_json::from_str(raw).map_err(|e| CoreError::repository(op, e))?;
    stored.try_into()
}

#[async_trait]
impl TaskRepository for RedisTaskRepo {
    async fn save(&self, task: &TaskRequest) -> Result<Task, CoreError> {
        const OP: &str = "save task";
        let mut conn = self
            .client
            .connection()
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        let next: u64 = conn
            .incr(NEXT_ID_KEY, 1)
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        let stored = Task::new(
            TaskId::new(next.to_string())?,
            task.name.clone(),
            task.is_done(),
            now(),
        );
        let payload = encode(OP, &stored)?;
        redis::pipe()
            .atomic()
            .set_ex(task_key(next), payload, self.ttl_secs())
            .ignore()
            .sadd(INDEX_KEY, next)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        debug!(task_id = %stored.id, "task stored in redis");
        Ok(stored)
    }

    async fn find_all(&self) -> Result<Vec<Task>, CoreError> {
        const OP: &str = "list tasks";
        let mut conn = self
            .client
            .connection()
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        let mut ids: Vec<u64> = conn
            .smembers(INDEX_KEY)
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort_unstable();

        let keys: Vec<String> = ids.iter().map(|id| task_key(*id)).collect();
        let values: Vec<Option<String>> = conn
            .mget(&keys)
            .await
            .map_err(|e| CoreError::repository(OP, e))?;

        let mut tasks = Vec::with_capacity(values.len());
        let mut expired = Vec::new();
        for (id, value) in ids.into_iter().zip(values) {
            match value {
                Some(raw) => tasks.push(decode(OP, &raw)?),
                None => expired.push(id),
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "pruning expired task ids");
            conn.srem::<_, _, ()>(INDEX_KEY, &expired)
                .await
                .map_err(|e| CoreError::repository(OP, e))?;
        }
        Ok(tasks)
    }

    async fn update(&self, id: &TaskId, task: &TaskRequest) -> Result<Task, CoreError> {
        const OP: &str = "update task";
        let key = task_key(item_id(id)?);
        let mut conn = self
            .client
            .connection()
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        let mut stored = decode(OP, &raw.ok_or(CoreError::NotFound)?)?;
        stored.name = task.name.clone();
        stored.done = task.is_done();
        stored.updated_at = now();

        // A concurrent delete between GET and SET leaves nothing to replace.
        let payload = encode(OP, &stored)?;
        let replaced: Option<String> = set_existing(&key, &payload, self.ttl_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        if replaced.is_none() {
            return Err(CoreError::NotFound);
        }
        Ok(stored)
    }

    async fn delete(&self, id: &TaskId) -> Result<(), CoreError> {
        const OP: &str = "delete task";
        let id = item_id(id)?;
        let mut conn = self
            .client
            .connection()
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(task_key(id))
            .srem(INDEX_KEY, id)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::repository(OP, e))?;
        if removed == 0 {
            return Err(CoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_args(cmd: &redis::Cmd) -> Vec<String> {
        cmd.args_iter()
            .filter_map(|arg| match arg {
                redis::Arg::Simple(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                redis::Arg::Cursor => None,
            })
            .collect()
    }

    #[test]
    fn item_keys_never_collide_with_metadata() {
        assert_eq!(task_key(12), "task:item:12");
        for id in ["ids", "next_id"] {
            let id = TaskId::new(id).unwrap();
            assert!(matches!(item_id(&id), Err(CoreError::InvalidTaskId(_))));
        }
        assert!(!task_key(1).starts_with("task:meta:"));
        assert!(INDEX_KEY.starts_with("task:meta:"));
        assert!(NEXT_ID_KEY.starts_with("task:meta:"));
    }

    #[test]
    fn item_id_accepts_counter_values_only() {
        assert_eq!(item_id(&TaskId::new("7").unwrap()).unwrap(), 7);
        assert!(item_id(&TaskId::new("0").unwrap()).is_err());
        assert!(item_id(&TaskId::new("-3").unwrap()).is_err());
    }

    #[test]
    fn update_write_requires_existing_key() {
        let cmd = set_existing("task:item:3", "{}", 60);
        assert_eq!(
            simple_args(&cmd),
            vec!["SET", "task:item:3", "{}", "EX", "60", "XX"]
        );
    }

    #[test]
    fn stored_task_keeps_fields() {
        let mut task = Task::new(TaskId::new("5").unwrap(), "laundry".into(), false, now());
        task.localized_name = Some("lessive".into());
        task.deleted_at = Some(now());

        let raw = encode("test", &task).unwrap();
        let back = decode("test", &raw).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn storage_precision_is_milliseconds() {
        let precise = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let task = Task::new(TaskId::new("1").unwrap(), "x".into(), false, precise);
        let back = decode("test", &encode("test", &task).unwrap()).unwrap();
        assert_eq!(
            back.created_at,
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_123)
        );
    }

    #[test]
    fn decode_reports_operation_on_garbage() {
        let err = decode("list tasks", "not json").unwrap_err();
        assert!(err.to_string().contains("list tasks"), "{err}");
    }

    #[tokio::test]
    async fn closed_client_surfaces_repository_error() {
        let repo = RedisTaskRepo::new(RedisClient::disconnected(), DEFAULT_TTL);
        let err = repo.save(&TaskRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, CoreError::Repository(ref m) if m.starts_with("save task")));
        assert!(repo.find_all().await.is_err());
    }

    #[tokio::test]
    async fn metadata_names_are_rejected_as_ids() {
        let repo = RedisTaskRepo::new(RedisClient::disconnected(), DEFAULT_TTL);
        let ids = TaskId::new("ids").unwrap();
        let next = TaskId::new("next_id").unwrap();
        assert!(matches!(repo.delete(&ids).await, Err(CoreError::InvalidTaskId(_))));
        assert!(matches!(repo.delete(&next).await, Err(CoreError::InvalidTaskId(_))));
        assert!(matches!(
            repo.update(&ids, &TaskRequest::new("x")).await,
            Err(CoreError::InvalidTaskId(_))
        ));
    }

    async fn live_repo() -> Option<RedisTaskRepo> {
        let url = std::env::var("TEST_REDIS_URL").ok()?;
        let client = redis::Client::open(url).expect("redis url");
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .expect("connect test redis");
        Some(RedisTaskRepo::new(
            RedisClient::from_manager(manager),
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn save_then_find_all_uses_one_keying_scheme() {
        let Some(repo) = live_repo().await else {
            return;
        };
        let saved = repo.save(&TaskRequest::new("redis round trip")).await.unwrap();

        let listed = repo.find_all().await.unwrap();
        let found = listed.iter().find(|t| t.id == saved.id).expect("saved task listed");
        assert_eq!(found, &saved);

        let updated = repo
            .update(&saved.id, &TaskRequest::new("renamed"))
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.created_at, saved.created_at);

        repo.delete(&saved.id).await.unwrap();
        let listed = repo.find_all().await.unwrap();
        assert!(listed.iter().all(|t| t.id != saved.id));
        assert!(matches!(repo.delete(&saved.id).await, Err(CoreError::NotFound)));
        assert!(matches!(
            repo.update(&saved.id, &TaskRequest::new("ghost")).await,
            Err(CoreError::NotFound)
        ));
    }
}
