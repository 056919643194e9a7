//! Tracing setup and once-only event logging.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{AppConfig, LogFormat};

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `app.debug`.
pub fn init_tracing(cfg: &AppConfig) {
    let default_level = if cfg.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

/// Remembers which named events were already logged so startup milestones
/// are reported once per process.
#[derive(Debug, Default)]
pub struct EventLog {
    seen: Mutex<HashSet<String>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `err` under `event` unless that event was logged before.
    /// Returns whether anything was emitted.
    pub fn log_once(&self, event: &str, err: &dyn std::fmt::Display) -> bool {
        if !self.first_time(event) {
            return false;
        }
        error!(event, err = %err, "logged once event");
        true
    }

    pub fn log_success(&self, event: &str) -> bool {
        if !self.first_time(event) {
            return false;
        }
        info!(event, "logged success event");
        true
    }

    fn first_time(&self, event: &str) -> bool {
        // A poisoned set only means another thread panicked mid-insert.
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.insert(event.to_string())
    }
}
