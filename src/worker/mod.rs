//! Task execution: handler registry, result cache, and the worker loop.

pub mod hash_cache;
pub mod registry;
pub mod worker;

pub use hash_cache::ContentHashCache;
pub use registry::{HandlerError, HandlerRegistry, TaskContext, TaskHandler};
pub use worker::{Worker, WorkerStatus};
