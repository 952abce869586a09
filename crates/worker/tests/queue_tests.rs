use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use taskrelay_core::config::QueueConfig;
use taskrelay_core::models::TaskType;
use taskrelay_core::{RelayError, RelayResult};
use taskrelay_worker::{
    CancelOutcome, JobState, LocalQueue, QueueRuntime, QueuedJob, TaskContext, TaskExecutor,
};
use tokio::sync::Notify;

/// 等待放行信号后返回，响应取消信号
struct Gated {
    gate: Arc<Notify>,
    started: Arc<Notify>,
    honour_cancel: bool,
}

#[async_trait]
impl TaskExecutor for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    async fn execute(&self, context: &TaskContext) -> RelayResult<Value> {
        self.started.notify_one();
        if self.honour_cancel {
            tokio::select! {
                _ = context.cancellation.cancelled() => Err(RelayError::TaskCancelled {
                    id: context.task_id.clone(),
                }),
                _ = self.gate.notified() => Ok(json!({"done": context.task_id})),
            }
        } else {
            self.gate.notified().await;
            Ok(json!({"done": context.task_id}))
        }
    }
}

struct Fails;

#[async_trait]
impl TaskExecutor for Fails {
    fn name(&self) -> &str {
        "fails"
    }

    async fn execute(&self, _context: &TaskContext) -> RelayResult<Value> {
        Err(RelayError::TaskExecution("nope".to_string()))
    }
}

fn queue(max_concurrent_jobs: usize) -> LocalQueue {
    LocalQueue::new(&QueueConfig {
        max_concurrent_jobs,
        ..QueueConfig::default()
    })
}

fn gated(honour_cancel: bool) -> (Arc<Gated>, Arc<Notify>, Arc<Notify>) {
    let gate = Arc::new(Notify::new());
    let started = Arc::new(Notify::new());
    let executor = Arc::new(Gated {
        gate: Arc::clone(&gate),
        started: Arc::clone(&started),
        honour_cancel,
    });
    (executor, gate, started)
}

fn job(task_id: &str, executor: Arc<dyn TaskExecutor>) -> QueuedJob {
    QueuedJob {
        task_id: task_id.to_string(),
        task_type: TaskType::Sample,
        args: Value::Null,
        executor,
    }
}

#[tokio::test]
async fn test_submitted_job_runs_to_completion() {
    let queue = queue(2);
    let (executor, gate, started) = gated(true);

    let handle = queue.submit(job("t1", executor)).await.unwrap();
    assert_eq!(handle.state, JobState::Submitted);

    started.notified().await;
    assert_eq!(queue.fetch("t1").await.unwrap().state, JobState::Running);

    gate.notify_one();
    let finished = queue.wait_for_terminal("t1").await.unwrap();
    assert_eq!(finished.state, JobState::Completed);
    assert_eq!(finished.result, Some(json!({"done": "t1"})));
    assert!(finished.started_at.is_some());
    assert!(finished.ended_at.is_some());
}

#[tokio::test]
async fn test_failed_job_records_error() {
    let queue = queue(1);
    queue.submit(job("t1", Arc::new(Fails))).await.unwrap();

    let finished = queue.wait_for_terminal("t1").await.unwrap();
    assert_eq!(finished.state, JobState::Failed);
    assert_eq!(finished.error.as_deref(), Some("nope"));
    assert_eq!(finished.public_result(), Some(json!("nope")));
}

#[tokio::test]
async fn test_fetch_unknown_job_is_absent() {
    let queue = queue(1);
    assert!(queue.fetch("missing").await.is_none());
    assert_eq!(
        queue.cancel("missing").await.unwrap(),
        CancelOutcome::NotFound
    );
}

#[tokio::test]
async fn test_duplicate_submission_rejected() {
    let queue = queue(1);
    let (executor, gate, _started) = gated(true);
    queue.submit(job("t1", executor.clone())).await.unwrap();

    let err = queue.submit(job("t1", executor)).await.unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)));
    gate.notify_one();
}

#[tokio::test]
async fn test_cancel_queued_job_never_runs() {
    let queue = queue(1);
    let (blocker, blocker_gate, blocker_started) = gated(true);
    let (waiting, _waiting_gate, _waiting_started) = gated(true);

    queue.submit(job("blocker", blocker)).await.unwrap();
    blocker_started.notified().await;
    queue.submit(job("waiting", waiting)).await.unwrap();

    assert_eq!(
        queue.cancel("waiting").await.unwrap(),
        CancelOutcome::Cancelled { was_running: false }
    );

    blocker_gate.notify_one();
    queue.wait_for_terminal("blocker").await.unwrap();

    let cancelled = queue.fetch("waiting").await.unwrap();
    assert_eq!(cancelled.state, JobState::Cancelled);
    assert!(cancelled.started_at.is_none());
}

#[tokio::test]
async fn test_cancel_running_job_waits_for_stop() {
    let queue = queue(1);
    let (executor, _gate, started) = gated(true);

    queue.submit(job("t1", executor)).await.unwrap();
    started.notified().await;

    assert_eq!(
        queue.cancel("t1").await.unwrap(),
        CancelOutcome::Cancelled { was_running: true }
    );
    assert_eq!(queue.fetch("t1").await.unwrap().state, JobState::Cancelled);
}

#[tokio::test]
async fn test_cancel_running_job_that_finishes_is_terminal() {
    let queue = queue(1);
    let (executor, gate, started) = gated(false);

    queue.submit(job("t1", executor)).await.unwrap();
    started.notified().await;

    let cancelling = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.cancel("t1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.notify_one();

    assert_eq!(
        cancelling.await.unwrap().unwrap(),
        CancelOutcome::AlreadyTerminal(JobState::Completed)
    );
}

#[tokio::test]
async fn test_cancel_after_completion_is_already_terminal() {
    let queue = queue(1);
    let (executor, gate, _started) = gated(true);

    queue.submit(job("t1", executor)).await.unwrap();
    gate.notify_one();
    queue.wait_for_terminal("t1").await.unwrap();

    assert_eq!(
        queue.cancel("t1").await.unwrap(),
        CancelOutcome::AlreadyTerminal(JobState::Completed)
    );
}

#[tokio::test]
async fn test_shutdown_cancels_and_rejects() {
    let queue = queue(1);
    let (executor, _gate, started) = gated(true);

    queue.submit(job("t1", executor.clone())).await.unwrap();
    started.notified().await;

    queue.shutdown(Duration::from_secs(5)).await;

    assert_eq!(queue.fetch("t1").await.unwrap().state, JobState::Cancelled);
    let err = queue.submit(job("t2", executor)).await.unwrap_err();
    assert!(matches!(err, RelayError::QueueClosed));
}

#[tokio::test]
async fn test_shutdown_keeps_cancelled_jobs_in_snapshot() {
    let queue = queue(1);
    let (executor, _gate, started) = gated(true);

    queue.submit(job("running", executor.clone())).await.unwrap();
    started.notified().await;
    queue.submit(job("waiting", executor)).await.unwrap();

    queue.shutdown(Duration::from_secs(5)).await;

    let mut jobs = queue.jobs().await;
    jobs.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    assert_eq!(jobs.len(), 2);

    assert_eq!(jobs[0].task_id, "running");
    assert_eq!(jobs[0].state, JobState::Cancelled);
    assert!(jobs[0].started_at.is_some());

    assert_eq!(jobs[1].task_id, "waiting");
    assert_eq!(jobs[1].state, JobState::Cancelled);
    assert!(jobs[1].started_at.is_none());
}
