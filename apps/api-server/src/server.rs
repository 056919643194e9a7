//! HTTP server lifecycle with bounded graceful shutdown.
//!
//! On shutdown the listener stops accepting and live connections drain.
//! Requests still running when the grace period expires are cancelled and
//! answered with 503. [`HttpServer::serve`] only returns once every request
//! future has finished, so callers can release backends afterwards.

use std::future::{Future, IntoFuture};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http_common::{correlation_id_or_new, REQUEST_ID_HEADER};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Observable server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Clone)]
struct InFlight {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

pub struct HttpServer {
    router: Router,
    grace: Duration,
    state: watch::Sender<ServerState>,
    in_flight: InFlight,
}

impl HttpServer {
    pub fn new(router: Router, grace: Duration) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        Self {
            router,
            grace,
            state,
            in_flight: InFlight {
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            },
        }
    }

    /// Subscribe to lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Serve until `shutdown` resolves, then drain within the grace period.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router.clone().layer(middleware::from_fn_with_state(
            self.in_flight.clone(),
            track_request,
        ));

        let draining = CancellationToken::new();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(draining.clone().cancelled_owned())
            .into_future();
        tokio::pin!(server);

        self.state.send_replace(ServerState::Running);

        let mut result = Ok(());
        tokio::select! {
            res = &mut server => {
                // Accept loop ended without a shutdown request.
                result = res;
            }
            _ = shutdown => {
                info!(grace_secs = self.grace.as_secs_f64(), "http server shutting down");
                self.state.send_replace(ServerState::ShuttingDown);
                draining.cancel();
                match tokio::time::timeout(self.grace, &mut server).await {
                    Ok(res) => result = res,
                    Err(_) => {
                        warn!("grace period elapsed, cancelling in-flight requests");
                        self.in_flight.cancel.cancel();
                    }
                }
            }
        }

        self.in_flight.tracker.close();
        self.in_flight.tracker.wait().await;
        self.state.send_replace(ServerState::Stopped);
        info!("http server graceful shutdown completed");
        result
    }
}

/// Runs outside the router's request-id layer, so the id is assigned here
/// and the inner layers keep it.
async fn track_request(State(in_flight): State<InFlight>, mut req: Request, next: Next) -> Response {
    let correlation_id = correlation_id_or_new(
        req.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
    );
    let header = HeaderValue::from_str(&correlation_id).ok();
    if let Some(value) = &header {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }
    let handled = in_flight.tracker.track_future(next.run(req));
    tokio::select! {
        biased;
        _ = in_flight.cancel.cancelled() => {
            warn!(%correlation_id, "request cancelled by shutdown");
            let mut resp = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(http_common::json_error(
                    &correlation_id,
                    "Server is shutting down",
                    "request cancelled",
                )),
            )
                .into_response();
            if let Some(value) = header {
                resp.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            resp
        }
        resp = handled => resp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::sync::Arc;
    use tokio::sync::{oneshot, Notify};

    async fn start(
        router: Router,
        grace: Duration,
    ) -> (
        String,
        oneshot::Sender<()>,
        watch::Receiver<ServerState>,
        tokio::task::JoinHandle<std::io::Result<()>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server = HttpServer::new(router, grace);
        let state = server.state();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async move {
            let _ = rx.await;
        }));
        (url, tx, state, handle)
    }

    #[tokio::test]
    async fn slow_request_completes_within_grace() {
        let started = Arc::new(Notify::new());
        let notify = started.clone();
        let router = Router::new().route(
            "/slow",
            get(move || {
                let notify = notify.clone();
                async move {
                    notify.notify_one();
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    "done"
                }
            }),
        );
        let (url, stop, mut state, handle) = start(router, Duration::from_secs(5)).await;
        state.wait_for(|s| *s == ServerState::Running).await.unwrap();

        let request = tokio::spawn(reqwest::get(format!("{url}/slow")));
        started.notified().await;
        stop.send(()).unwrap();

        let resp = request.await.unwrap().unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "done");

        handle.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn hanging_request_is_cancelled_after_grace() {
        let started = Arc::new(Notify::new());
        let notify = started.clone();
        let router = Router::new().route(
            "/hang",
            get(move || {
                let notify = notify.clone();
                async move {
                    notify.notify_one();
                    std::future::pending::<()>().await;
                    "unreachable"
                }
            }),
        );
        let (url, stop, _state, handle) = start(router, Duration::from_millis(100)).await;

        let request = tokio::spawn(reqwest::get(format!("{url}/hang")));
        started.notified().await;
        stop.send(()).unwrap();

        let resp = request.await.unwrap().unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let request_id = resp
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("cancelled response carries a request id")
            .to_str()
            .unwrap()
            .to_string();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["correlation_id"], request_id);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server returns after cancelling")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn router_sees_the_tracked_request_id() {
        let router = Router::new().route(
            "/",
            get(|headers: axum::http::HeaderMap| async move {
                headers
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );
        let (url, stop, mut state, handle) = start(router, Duration::from_secs(1)).await;
        state.wait_for(|s| *s == ServerState::Running).await.unwrap();

        let echoed = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert!(!echoed.is_empty());

        let client = reqwest::Client::new();
        let echoed = client
            .get(&url)
            .header(REQUEST_ID_HEADER, "req-7")
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(echoed, "req-7");

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stopped_server_refuses_connections() {
        let router = Router::new().route("/", get(|| async { "ok" }));
        let (url, stop, mut state, handle) = start(router, Duration::from_secs(1)).await;
        state.wait_for(|s| *s == ServerState::Running).await.unwrap();

        assert!(reqwest::get(&url).await.unwrap().status().is_success());

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(reqwest::get(&url).await.is_err());
    }

    #[test]
    fn new_server_is_idle() {
        let server = HttpServer::new(Router::new(), Duration::from_secs(1));
        assert_eq!(*server.state().borrow(), ServerState::Idle);
    }
}
