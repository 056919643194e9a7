//! api-server: HTTP front end for the task service.
//!
//! Startup order: load [`config::Config`], build the backend
//! [`domain::registry::Registry`], build the task repository over it, then
//! serve `/tasks` through [`server::HttpServer`]. Shutdown runs in reverse:
//! the server drains first, then every backend is closed.

pub mod app;
pub mod config;
pub mod handler;
pub mod server;
pub mod telemetry;
