//! Attention Queue — durable per-user task queue and worker engine.

pub mod config;
pub mod error;
pub mod handlers;
pub mod providers;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod worker;
