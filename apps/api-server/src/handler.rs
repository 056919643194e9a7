//! REST surface under `/tasks`.
//!
//! Handlers translate HTTP input into domain requests, call the
//! [`TaskService`] and map [`CoreError`] onto status codes. Every error body
//! carries the request's correlation id (the `x-request-id` header).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use domain::service::TaskService;
use domain::{CoreError, Task, TaskId, TaskRepository, TaskRequest};
use http_common::{correlation_id_or_new, REQUEST_ID_HEADER};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::config::{AppConfig, ConfigError};

pub type SharedTaskService = Arc<TaskService<Arc<dyn TaskRepository>>>;

#[derive(Clone)]
pub struct AppState {
    pub service: SharedTaskService,
}

impl AppState {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            service: Arc::new(TaskService::new(repo)),
        }
    }
}

/// Build the task routes with tracing, request id, timeout and CORS layers.
pub fn router(state: AppState, cfg: &AppConfig) -> Result<Router, ConfigError> {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let app = Router::new()
        .route("/tasks", get(index).post(store))
        .route("/tasks/", get(index).post(store))
        .route("/tasks/:id", patch(update).delete(destroy))
        .layer(middleware::from_fn_with_state(
            cfg.request_timeout(),
            enforce_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .with_state(state);

    Ok(app.layer(cors_layer(cfg)?))
}

fn cors_layer(cfg: &AppConfig) -> Result<CorsLayer, ConfigError> {
    if cfg.cors_allow_origin == "*" {
        return Ok(CorsLayer::permissive());
    }
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list([cfg.cors_origin()?]))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)]))
}

/// Wire representation of a task.
#[derive(Debug, Serialize)]
pub struct TaskOut {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub localized_name: Option<String>,
    pub done: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl From<Task> for TaskOut {
    fn from(task: Task) -> Self {
        Self {
            id: task.id.as_str().to_string(),
            name: task.name,
            localized_name: task.localized_name,
            done: task.done,
            created_at: http_common::system_time_to_rfc3339(task.created_at),
            updated_at: http_common::system_time_to_rfc3339(task.updated_at),
            deleted_at: task.deleted_at.map(http_common::system_time_to_rfc3339),
        }
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    correlation_id_or_new(headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()))
}

/// Answer 408 with the error envelope when a handler outlives `limit`.
async fn enforce_timeout(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    let cid = correlation_id(req.headers());
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(resp) => resp,
        Err(elapsed) => respond_error(
            StatusCode::REQUEST_TIMEOUT,
            &cid,
            "Request timed out",
            &elapsed,
        ),
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::InvalidInput(_) | CoreError::InvalidTaskId(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound => StatusCode::NOT_FOUND,
        CoreError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond_error(
    status: StatusCode,
    correlation_id: &str,
    message: &str,
    err: &dyn std::fmt::Display,
) -> Response {
    if status.is_server_error() {
        error!(%correlation_id, err = %err, "{message}");
    } else {
        warn!(%correlation_id, err = %err, "{message}");
    }
    (
        status,
        Json(http_common::json_error(correlation_id, message, &err.to_string())),
    )
        .into_response()
}

fn core_error(correlation_id: &str, message: &str, err: CoreError) -> Response {
    respond_error(status_for(&err), correlation_id, message, &err)
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cid = correlation_id(&headers);
    debug!(correlation_id = %cid, event = "list_tasks", "event started");
    match state.service.get_all_tasks().await {
        Ok(tasks) => {
            debug!(correlation_id = %cid, event = "list_tasks", "event finished");
            let out: Vec<TaskOut> = tasks.into_iter().map(TaskOut::from).collect();
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => core_error(&cid, "Failed to retrieve tasks", e),
    }
}

async fn store(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Response {
    let cid = correlation_id(&headers);
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return respond_error(
                StatusCode::BAD_REQUEST,
                &cid,
                "Invalid task input",
                &rejection.body_text(),
            )
        }
    };
    debug!(correlation_id = %cid, event = "create_task", "event started");
    match state.service.create_task(&req).await {
        Ok(task) => {
            debug!(correlation_id = %cid, event = "create_task", task_id = %task.id, "event finished");
            (
                StatusCode::CREATED,
                Json(http_common::json_success_with_data(
                    "Task created successfully",
                    &TaskOut::from(task),
                )),
            )
                .into_response()
        }
        Err(e) => core_error(&cid, "Failed to save task", e),
    }
}

async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Response {
    let cid = correlation_id(&headers);
    let id = match TaskId::new(id) {
        Ok(id) => id,
        Err(e) => return core_error(&cid, "Invalid task id", e),
    };
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return respond_error(
                StatusCode::BAD_REQUEST,
                &cid,
                "Invalid task data",
                &rejection.body_text(),
            )
        }
    };
    debug!(correlation_id = %cid, event = "update_task", task_id = %id, "event started");
    match state.service.update_task(&id, &req).await {
        Ok(task) => {
            debug!(correlation_id = %cid, event = "update_task", task_id = %id, "event finished");
            (
                StatusCode::OK,
                Json(http_common::json_success_with_data(
                    "Task updated successfully",
                    &TaskOut::from(task),
                )),
            )
                .into_response()
        }
        Err(e) => core_error(&cid, "Failed to update task", e),
    }
}

async fn destroy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let cid = correlation_id(&headers);
    let id = match TaskId::new(id) {
        Ok(id) => id,
        Err(e) => return core_error(&cid, "Invalid task id", e),
    };
    debug!(correlation_id = %cid, event = "delete_task", task_id = %id, "event started");
    match state.service.delete_task(&id).await {
        Ok(()) => {
            debug!(correlation_id = %cid, event = "delete_task", task_id = %id, "event finished");
            (
                StatusCode::OK,
                Json(http_common::json_success("Task deleted successfully")),
            )
                .into_response()
        }
        Err(e) => core_error(&cid, "Failed to delete task", e),
    }
}
