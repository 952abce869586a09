//! # taskrelay-dispatcher
//!
//! 任务分发与状态传播：分发器、Worker轮询、状态扇出管道和观察者广播。

pub mod broadcast;
pub mod status_pipeline;
pub mod task_dispatcher;
pub mod worker_registry;

pub use broadcast::{ObserverConnection, ObserverHub, ObserverId, ObserverScope};
pub use status_pipeline::{PipelineHandle, StatusPipeline};
pub use task_dispatcher::{TaskDispatcher, TASK_STATUS_OPERATION};
pub use worker_registry::WorkerRegistry;
