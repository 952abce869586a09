use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use taskrelay_core::models::{
    Task, TaskCreate, TaskResultCreate, TaskStatus, TaskStatusView, TaskType, TaskUpdate,
};
use taskrelay_core::traits::{TaskRepository, TaskResultRepository};
use taskrelay_core::{RelayError, RelayResult};
use taskrelay_infrastructure::{ReadThroughCache, Repositories};
use taskrelay_worker::{
    CancelOutcome, JobHandle, JobState, QueueRuntime, QueuedJob, StatusPublisher, TaskRegistry,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 任务状态查询在缓存中使用的操作名
pub const TASK_STATUS_OPERATION: &str = "task_status";

/// 任务分发器
///
/// 负责校验任务类型、持久化任务记录并提交到队列运行时，
/// 同时提供状态查询与取消。
pub struct TaskDispatcher {
    registry: Arc<TaskRegistry>,
    queue: Arc<dyn QueueRuntime>,
    tasks: Arc<dyn TaskRepository>,
    results: Arc<dyn TaskResultRepository>,
    publisher: StatusPublisher,
    cache: Option<Arc<ReadThroughCache>>,
    status_ttl: Duration,
}

impl TaskDispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        queue: Arc<dyn QueueRuntime>,
        repositories: Repositories,
        publisher: StatusPublisher,
    ) -> Self {
        Self {
            registry,
            queue,
            tasks: repositories.tasks,
            results: repositories.results,
            publisher,
            cache: None,
            status_ttl: Duration::from_secs(60),
        }
    }

    /// 为状态查询启用读穿缓存
    pub fn with_cache(mut self, cache: Arc<ReadThroughCache>, status_ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.status_ttl = status_ttl;
        self
    }

    /// 提交任务，立即返回已排队的任务记录
    #[instrument(skip(self, args))]
    pub async fn enqueue(
        &self,
        task_type: TaskType,
        args: Value,
        actor: Option<&str>,
    ) -> RelayResult<Task> {
        let executor = self
            .registry
            .get(task_type)
            .ok_or_else(|| RelayError::UnsupportedTaskType(task_type.to_string()))?;

        let task_id = Uuid::new_v4().to_string();
        let task = self
            .tasks
            .add(TaskCreate::queued(&task_id, task_type, actor))
            .await?;

        let job = QueuedJob {
            task_id: task_id.clone(),
            task_type,
            args,
            executor,
        };
        if let Err(e) = self.queue.submit(job).await {
            error!("提交任务 {} 到队列失败: {}", task_id, e);
            if let Err(update_err) = self
                .tasks
                .update(TaskUpdate::status(&task_id, TaskStatus::Failed))
                .await
            {
                error!("标记任务 {} 失败状态时出错: {}", task_id, update_err);
            }
            return Err(e);
        }

        metrics::counter!("taskrelay_tasks_enqueued_total").increment(1);
        info!("任务 {} ({}) 已入队", task_id, task_type);
        Ok(task)
    }

    /// 查询队列运行时中的作业句柄
    pub async fn fetch(&self, task_id: &str) -> Option<JobHandle> {
        self.queue.fetch(task_id).await
    }

    /// 查询任务状态，优先使用运行时中的实时句柄
    ///
    /// 执行体发布终止事件早于句柄更新，句柄未结束而持久化记录已终止时以记录为准。
    #[instrument(skip(self))]
    pub async fn status(&self, task_id: &str) -> RelayResult<TaskStatusView> {
        let Some(handle) = self.queue.fetch(task_id).await else {
            return self.stored_status(task_id).await;
        };

        if !handle.state.is_terminal() {
            match self.stored_status(task_id).await {
                Ok(view) if view.status.is_terminal() => return Ok(view),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("查询任务 {} 持久化状态失败: {}", task_id, e),
            }
        }

        Ok(TaskStatusView {
            id: handle.task_id.clone(),
            status: handle.state.task_status(),
            result: handle.public_result(),
        })
    }

    async fn stored_status(&self, task_id: &str) -> RelayResult<TaskStatusView> {
        let task = self.tasks.get(task_id).await?;
        let result = match self.results.get(task_id).await {
            Ok(result) => Some(result.result),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!("查询任务 {} 结果失败: {}", task_id, e);
                None
            }
        };

        Ok(TaskStatusView {
            id: task.id,
            status: task.status,
            result,
        })
    }

    /// 经过读穿缓存的状态查询
    ///
    /// 只缓存终止状态，未结束的任务每次都读取最新状态。
    pub async fn cached_status(&self, task_id: &str) -> RelayResult<TaskStatusView> {
        match &self.cache {
            Some(cache) => {
                cache
                    .cached_call_if(
                        Some(self.status_ttl),
                        TASK_STATUS_OPERATION,
                        task_id,
                        || self.status(task_id),
                        |view: &TaskStatusView| view.status.is_terminal(),
                    )
                    .await
            }
            None => self.status(task_id).await,
        }
    }

    /// 取消任务
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: &str, actor: Option<&str>) -> RelayResult<CancelOutcome> {
        let outcome = self.queue.cancel(task_id).await?;

        match outcome {
            CancelOutcome::Cancelled { was_running } => {
                if let Err(e) = self
                    .tasks
                    .update(TaskUpdate::cancelled(task_id, actor))
                    .await
                {
                    error!("持久化任务 {} 取消状态失败: {}", task_id, e);
                }
                if !was_running {
                    if let Err(e) = self
                        .publisher
                        .publish_status(task_id, TaskStatus::Cancelled, None)
                        .await
                    {
                        warn!("发布任务 {} 取消事件失败: {}", task_id, e);
                    }
                }
                if let Some(cache) = &self.cache {
                    cache.invalidate(TASK_STATUS_OPERATION, task_id).await;
                }
                info!("任务 {} 已取消 (运行中: {})", task_id, was_running);
                Ok(outcome)
            }
            CancelOutcome::AlreadyTerminal(state) => {
                debug!("任务 {} 已处于终止状态: {:?}", task_id, state);
                Ok(outcome)
            }
            CancelOutcome::NotFound => match self.tasks.get(task_id).await {
                Ok(task) if task.status.is_terminal() => {
                    Ok(CancelOutcome::AlreadyTerminal(job_state_for(task.status)))
                }
                Ok(task) => {
                    warn!(
                        "任务 {} 的状态为 {} 但未被队列运行时跟踪",
                        task_id, task.status
                    );
                    Ok(CancelOutcome::NotFound)
                }
                Err(e) if e.is_not_found() => Ok(CancelOutcome::NotFound),
                Err(e) => Err(e),
            },
        }
    }

    /// 关闭队列运行时，并把关闭期间结束的作业同步到持久化记录
    ///
    /// 排队中被取消的作业从未发布过事件，这里补发 CANCELLED。
    /// 返回同步的任务数。
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.queue.shutdown(timeout).await;

        let mut reconciled = 0;
        for handle in self.queue.jobs().await {
            if !handle.state.is_terminal() {
                warn!("任务 {} 在关闭超时后仍未结束", handle.task_id);
                continue;
            }
            match self.reconcile(&handle).await {
                Ok(true) => reconciled += 1,
                Ok(false) => {}
                Err(e) => error!("同步任务 {} 的终止状态失败: {}", handle.task_id, e),
            }
        }

        if reconciled > 0 {
            info!("关闭时同步了 {} 个任务的终止状态", reconciled);
        }
        reconciled
    }

    async fn reconcile(&self, handle: &JobHandle) -> RelayResult<bool> {
        let task = self.tasks.get(&handle.task_id).await?;
        if task.status.is_terminal() {
            return Ok(false);
        }

        let status = handle.state.task_status();
        let update = if status == TaskStatus::Cancelled {
            TaskUpdate::cancelled(&handle.task_id, None)
        } else {
            TaskUpdate::status(&handle.task_id, status)
        };
        self.tasks.update(update).await?;

        if let (TaskStatus::Completed, Some(result)) = (status, &handle.result) {
            let create = TaskResultCreate {
                task_id: handle.task_id.clone(),
                result: result.clone(),
            };
            match self.results.add(create).await {
                Ok(_) | Err(RelayError::TaskResultAlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if handle.started_at.is_none() {
            if let Err(e) = self
                .publisher
                .publish_status(&handle.task_id, status, None)
                .await
            {
                warn!("发布任务 {} 的 {} 状态失败: {}", handle.task_id, status, e);
            }
        }

        if let Some(cache) = &self.cache {
            cache.invalidate(TASK_STATUS_OPERATION, handle.task_id.as_str()).await;
        }
        debug!("任务 {} 的持久化状态已同步为 {}", handle.task_id, status);
        Ok(true)
    }
}

fn job_state_for(status: TaskStatus) -> JobState {
    match status {
        TaskStatus::Queued => JobState::Submitted,
        TaskStatus::Running => JobState::Running,
        TaskStatus::Completed => JobState::Completed,
        TaskStatus::Failed => JobState::Failed,
        TaskStatus::Cancelled => JobState::Cancelled,
    }
}
