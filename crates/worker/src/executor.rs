use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use taskrelay_core::models::{TaskStatus, TaskType};
use taskrelay_core::{RelayError, RelayResult};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::status::StatusPublisher;

/// 任务执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub task_type: TaskType,
    pub args: Value,
    /// 取消信号，执行体应尽快响应
    pub cancellation: CancellationToken,
}

impl TaskContext {
    pub fn new(task_id: impl Into<String>, task_type: TaskType, args: Value) -> Self {
        Self {
            task_id: task_id.into(),
            task_type,
            args,
            cancellation: CancellationToken::new(),
        }
    }
}

/// 任务执行体
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// 执行任务并返回结果，失败时返回 [`RelayError::TaskExecution`]
    async fn execute(&self, context: &TaskContext) -> RelayResult<Value>;
}

/// 在执行体前后发布状态事件的包装器
///
/// 执行前发布 RUNNING；成功发布 COMPLETED 及结果；失败发布 FAILED 并以错误文本作为结果；
/// 收到取消信号时放弃执行体并发布 CANCELLED。发布失败只记录日志，不影响执行结果。
pub struct StatusPublishingExecutor {
    inner: Arc<dyn TaskExecutor>,
    publisher: StatusPublisher,
}

impl StatusPublishingExecutor {
    pub fn new(inner: Arc<dyn TaskExecutor>, publisher: StatusPublisher) -> Self {
        Self { inner, publisher }
    }

    async fn publish(&self, task_id: &str, status: TaskStatus, result: Option<Value>) {
        if let Err(e) = self.publisher.publish_status(task_id, status, result).await {
            warn!("发布任务 {} 的 {} 状态失败: {}", task_id, status, e);
        }
    }
}

#[async_trait]
impl TaskExecutor for StatusPublishingExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute(&self, context: &TaskContext) -> RelayResult<Value> {
        let task_id = context.task_id.as_str();
        self.publish(task_id, TaskStatus::Running, None).await;

        let outcome = tokio::select! {
            biased;
            _ = context.cancellation.cancelled() => None,
            result = self.inner.execute(context) => Some(result),
        };

        match outcome {
            Some(Ok(value)) => {
                info!("任务 {} 执行完成", task_id);
                self.publish(task_id, TaskStatus::Completed, Some(value.clone()))
                    .await;
                Ok(value)
            }
            Some(Err(e)) => {
                error!("任务 {} 执行失败: {}", task_id, e);
                let detail = match &e {
                    RelayError::TaskExecution(message) => message.clone(),
                    other => other.to_string(),
                };
                self.publish(task_id, TaskStatus::Failed, Some(Value::String(detail)))
                    .await;
                Err(e)
            }
            None => {
                info!("任务 {} 已取消", task_id);
                self.publish(task_id, TaskStatus::Cancelled, None).await;
                Err(RelayError::TaskCancelled {
                    id: task_id.to_string(),
                })
            }
        }
    }
}
