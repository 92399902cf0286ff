//! Durable task persistence.

mod libsql_backend;
pub mod migrations;
mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{StatusCounts, TaskStore};
