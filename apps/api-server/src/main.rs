//! api-server binary.
//!
//! Run:
//! ```bash
//! # config.yaml in the working directory
//! cargo run -p api-server
//!
//! # explicit file, in-memory store, JSON logs
//! TASKS_CONFIG=/etc/tasks.yaml TASK_STORE=memory LOG_FORMAT=json \
//!   cargo run -p api-server
//! ```
//!
//! Configuration: see `config.rs` for the file format and environment
//! overrides.

use api_server::app::App;
use api_server::config::Config;
use api_server::telemetry::{self, EventLog};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    telemetry::init_tracing(&cfg.app);
    cfg.warn_if_insecure();

    let events = EventLog::new();
    let app = match App::initialize(cfg, &events).await {
        Ok(app) => app,
        Err(e) => {
            error!(err = %e, "startup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run(shutdown_signal()).await {
        error!(err = %e, "api-server stopped with error");
        std::process::exit(1);
    }
    info!("api-server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(err = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(err = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
