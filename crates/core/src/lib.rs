//! # taskrelay-core
//!
//! 任务中继系统的核心类型：错误、数据模型、配置以及 Broker / 仓储接口。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::{
    StatusChannels, StatusEvent, Task, TaskCreate, TaskResult, TaskResultCreate, TaskStatus,
    TaskStatusView, TaskType, TaskUpdate,
};
pub use traits::{Broker, BrokerMessage, Subscription, TaskRepository, TaskResultRepository};
