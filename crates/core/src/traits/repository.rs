//! 数据仓储层接口定义
//!
//! - `TaskRepository` - 任务记录的新增、更新与查询
//! - `TaskResultRepository` - 任务结果的写入与查询，结果写入后不可变
//!
//! 查询不存在的记录返回 `NotFound` 类错误，重复写入结果返回
//! [`RelayError::TaskResultAlreadyExists`](crate::RelayError::TaskResultAlreadyExists)。

use async_trait::async_trait;

use crate::models::{Task, TaskCreate, TaskResult, TaskResultCreate, TaskUpdate};
use crate::RelayResult;

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 新增任务
    async fn add(&self, task: TaskCreate) -> RelayResult<Task>;

    /// 更新任务，未设置的字段保持原值
    async fn update(&self, update: TaskUpdate) -> RelayResult<Task>;

    /// 根据ID查询任务
    async fn get(&self, id: &str) -> RelayResult<Task>;
}

/// 任务结果仓储接口
#[async_trait]
pub trait TaskResultRepository: Send + Sync {
    /// 写入任务结果
    async fn add(&self, result: TaskResultCreate) -> RelayResult<TaskResult>;

    /// 根据任务ID查询结果
    async fn get(&self, task_id: &str) -> RelayResult<TaskResult>;
}
