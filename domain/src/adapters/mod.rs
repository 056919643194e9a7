//! Adapters that live inside the domain crate for convenience.
//!
//! The in-memory repository backs local runs and unit tests. Real backends
//! (Postgres, Redis) live in separate crates.

pub mod memory_repo;
