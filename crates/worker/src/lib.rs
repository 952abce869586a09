//! # taskrelay-worker
//!
//! 任务执行侧：执行体接口、状态发布包装器、任务注册表与进程内队列运行时。

pub mod executor;
pub mod queue;
pub mod registry;
pub mod status;
pub mod tasks;

pub use executor::{StatusPublishingExecutor, TaskContext, TaskExecutor};
pub use queue::{CancelOutcome, JobHandle, JobState, LocalQueue, QueueRuntime, QueuedJob};
pub use registry::TaskRegistry;
pub use status::StatusPublisher;
