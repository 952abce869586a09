//! 任务队列运行时
//!
//! [`QueueRuntime`] 是分发器与执行环境之间的契约；[`LocalQueue`] 在进程内用
//! tokio 任务执行作业，并发数由信号量限制，每个作业的状态保存在 watch 通道中。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use taskrelay_core::config::QueueConfig;
use taskrelay_core::models::{TaskStatus, TaskType};
use taskrelay_core::{RelayError, RelayResult};
use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::executor::{TaskContext, TaskExecutor};

/// 作业在运行时中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn task_status(&self) -> TaskStatus {
        match self {
            JobState::Submitted => TaskStatus::Queued,
            JobState::Running => TaskStatus::Running,
            JobState::Completed => TaskStatus::Completed,
            JobState::Failed => TaskStatus::Failed,
            JobState::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// 作业执行句柄的快照
#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub task_id: String,
    pub task_type: TaskType,
    pub state: JobState,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobHandle {
    fn submitted(task_id: &str, task_type: TaskType) -> Self {
        Self {
            task_id: task_id.to_string(),
            task_type,
            state: JobState::Submitted,
            result: None,
            error: None,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.ended_at = Some(Utc::now());
    }

    /// 对外暴露的结果：成功时为返回值，失败时为错误文本
    pub fn public_result(&self) -> Option<Value> {
        match self.state {
            JobState::Completed => self.result.clone(),
            JobState::Failed => self.error.clone().map(Value::String),
            _ => None,
        }
    }
}

/// 待执行的作业
pub struct QueuedJob {
    pub task_id: String,
    pub task_type: TaskType,
    pub args: Value,
    pub executor: Arc<dyn TaskExecutor>,
}

/// 取消请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// 作业已被终止；`was_running` 表示取消时作业是否已开始执行
    Cancelled { was_running: bool },
    AlreadyTerminal(JobState),
    NotFound,
}

#[async_trait]
pub trait QueueRuntime: Send + Sync {
    /// 提交作业，立即返回
    async fn submit(&self, job: QueuedJob) -> RelayResult<JobHandle>;

    /// 查询仍被跟踪的作业
    async fn fetch(&self, task_id: &str) -> Option<JobHandle>;

    /// 取消作业；运行中的作业会等待其真正停止后再给出结论
    async fn cancel(&self, task_id: &str) -> RelayResult<CancelOutcome>;

    /// 当前仍被跟踪的全部作业快照
    async fn jobs(&self) -> Vec<JobHandle>;

    /// 停止接收作业，取消在途作业并在超时内等待其结束
    ///
    /// 关闭后已结束的作业仍保留在快照中，供调用方核对。
    async fn shutdown(&self, timeout: Duration);
}

#[derive(Clone)]
struct JobEntry {
    state: Arc<watch::Sender<JobHandle>>,
    cancel: CancellationToken,
}

struct QueueInner {
    jobs: RwLock<HashMap<String, JobEntry>>,
    permits: Arc<Semaphore>,
    retention: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl QueueInner {
    /// 终止状态的作业保留一段时间后移除
    fn schedule_eviction(self: &Arc<Self>, task_id: String) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(inner.retention) => {}
                _ = inner.shutdown.cancelled() => return,
            }
            inner.jobs.write().await.remove(&task_id);
            debug!("移除已结束的作业: {}", task_id);
        });
    }

    async fn run_job(self: Arc<Self>, job: QueuedJob, entry: JobEntry) {
        let task_id = job.task_id.clone();

        let permit = tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        let Some(_permit) = permit else {
            entry.state.send_if_modified(|handle| {
                if handle.state == JobState::Submitted {
                    handle.finish(JobState::Cancelled);
                    true
                } else {
                    false
                }
            });
            debug!("作业 {} 在排队时被取消", task_id);
            self.schedule_eviction(task_id);
            return;
        };

        let started = entry.state.send_if_modified(|handle| {
            if handle.state == JobState::Submitted {
                handle.state = JobState::Running;
                handle.started_at = Some(Utc::now());
                true
            } else {
                false
            }
        });
        if !started {
            self.schedule_eviction(task_id);
            return;
        }

        let context = TaskContext {
            task_id: task_id.clone(),
            task_type: job.task_type,
            args: job.args,
            cancellation: entry.cancel.clone(),
        };
        let outcome = job.executor.execute(&context).await;

        entry.state.send_modify(|handle| match outcome {
            Ok(value) => {
                handle.result = Some(value);
                handle.finish(JobState::Completed);
            }
            Err(RelayError::TaskCancelled { .. }) => handle.finish(JobState::Cancelled),
            Err(e) => {
                handle.error = Some(match e {
                    RelayError::TaskExecution(message) => message,
                    other => other.to_string(),
                });
                handle.finish(JobState::Failed);
            }
        });
        self.schedule_eviction(task_id);
    }
}

/// 进程内作业队列
#[derive(Clone)]
pub struct LocalQueue {
    inner: Arc<QueueInner>,
}

impl LocalQueue {
    pub fn new(config: &QueueConfig) -> Self {
        info!(
            "创建本地任务队列，最大并发: {}",
            config.max_concurrent_jobs
        );
        Self {
            inner: Arc::new(QueueInner {
                jobs: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                retention: config.job_retention(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// 等待作业进入终止状态
    pub async fn wait_for_terminal(&self, task_id: &str) -> Option<JobHandle> {
        let entry = self.inner.jobs.read().await.get(task_id).cloned()?;
        let mut receiver = entry.state.subscribe();
        let handle = receiver
            .wait_for(|handle| handle.state.is_terminal())
            .await
            .ok()?
            .clone();
        Some(handle)
    }

    pub async fn tracked_jobs(&self) -> usize {
        self.inner.jobs.read().await.len()
    }
}

#[async_trait]
impl QueueRuntime for LocalQueue {
    async fn submit(&self, job: QueuedJob) -> RelayResult<JobHandle> {
        if self.inner.shutdown.is_cancelled() {
            return Err(RelayError::QueueClosed);
        }

        let handle = JobHandle::submitted(&job.task_id, job.task_type);
        let (sender, _) = watch::channel(handle.clone());
        let entry = JobEntry {
            state: Arc::new(sender),
            cancel: self.inner.shutdown.child_token(),
        };

        {
            let mut jobs = self.inner.jobs.write().await;
            if jobs.contains_key(&job.task_id) {
                return Err(RelayError::Validation(format!(
                    "作业已在队列中: {}",
                    job.task_id
                )));
            }
            jobs.insert(job.task_id.clone(), entry.clone());
        }

        debug!("提交作业: {} ({})", job.task_id, job.task_type);
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(inner.run_job(job, entry));
        Ok(handle)
    }

    async fn fetch(&self, task_id: &str) -> Option<JobHandle> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(task_id).map(|entry| entry.state.borrow().clone())
    }

    async fn jobs(&self) -> Vec<JobHandle> {
        let jobs = self.inner.jobs.read().await;
        jobs.values()
            .map(|entry| entry.state.borrow().clone())
            .collect()
    }

    async fn cancel(&self, task_id: &str) -> RelayResult<CancelOutcome> {
        let Some(entry) = self.inner.jobs.read().await.get(task_id).cloned() else {
            return Ok(CancelOutcome::NotFound);
        };

        let mut prior = JobState::Submitted;
        entry.state.send_if_modified(|handle| {
            prior = handle.state;
            if handle.state == JobState::Submitted {
                handle.finish(JobState::Cancelled);
                true
            } else {
                false
            }
        });

        match prior {
            JobState::Submitted => {
                entry.cancel.cancel();
                info!("取消排队中的作业: {}", task_id);
                Ok(CancelOutcome::Cancelled { was_running: false })
            }
            JobState::Running => {
                entry.cancel.cancel();
                let mut receiver = entry.state.subscribe();
                let final_state = receiver
                    .wait_for(|handle| handle.state.is_terminal())
                    .await
                    .map(|handle| handle.state)
                    .map_err(|e| RelayError::Internal(format!("作业状态通道已关闭: {e}")))?;

                if final_state == JobState::Cancelled {
                    info!("取消运行中的作业: {}", task_id);
                    Ok(CancelOutcome::Cancelled { was_running: true })
                } else {
                    debug!("作业 {} 在取消前已结束: {:?}", task_id, final_state);
                    Ok(CancelOutcome::AlreadyTerminal(final_state))
                }
            }
            terminal => Ok(CancelOutcome::AlreadyTerminal(terminal)),
        }
    }

    async fn shutdown(&self, timeout: Duration) {
        info!("关闭本地任务队列");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        if tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!("等待在途作业超时，剩余 {} 个", self.inner.tracker.len());
        }
    }
}
