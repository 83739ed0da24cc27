// Common library for shared code across the orchestrator and API binaries

pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod queue;
pub mod schedule;
pub mod scheduler;
