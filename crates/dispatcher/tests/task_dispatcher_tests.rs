use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use taskrelay_core::config::QueueConfig;
use taskrelay_core::models::{
    StatusChannels, StatusEvent, Task, TaskCreate, TaskStatus, TaskType, TaskUpdate,
};
use taskrelay_core::traits::{Broker, TaskRepository};
use taskrelay_core::{RelayError, RelayResult};
use taskrelay_dispatcher::TaskDispatcher;
use taskrelay_infrastructure::database::{InMemoryTaskRepository, InMemoryTaskResultRepository};
use taskrelay_infrastructure::{InMemoryBroker, Repositories};
use taskrelay_worker::{
    CancelOutcome, JobState, LocalQueue, QueueRuntime, StatusPublisher, TaskRegistry,
};

/// 记录新增任务ID的仓储
struct RecordingTaskRepository {
    inner: InMemoryTaskRepository,
    added: Mutex<Vec<String>>,
}

impl RecordingTaskRepository {
    fn new() -> Self {
        Self {
            inner: InMemoryTaskRepository::new(),
            added: Mutex::new(Vec::new()),
        }
    }

    fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskRepository for RecordingTaskRepository {
    async fn add(&self, task: TaskCreate) -> RelayResult<Task> {
        self.added.lock().unwrap().push(task.id.clone());
        self.inner.add(task).await
    }

    async fn update(&self, update: TaskUpdate) -> RelayResult<Task> {
        self.inner.update(update).await
    }

    async fn get(&self, id: &str) -> RelayResult<Task> {
        self.inner.get(id).await
    }
}

struct Harness {
    broker: InMemoryBroker,
    queue: LocalQueue,
    tasks: Arc<RecordingTaskRepository>,
    dispatcher: TaskDispatcher,
}

fn harness(max_concurrent_jobs: usize, with_builtin: bool) -> Harness {
    let broker = InMemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let publisher = StatusPublisher::new(shared, StatusChannels::default());

    let registry = if with_builtin {
        TaskRegistry::with_builtin_tasks(publisher.clone(), Duration::from_secs(60))
    } else {
        TaskRegistry::new()
    };

    let queue = LocalQueue::new(&QueueConfig {
        max_concurrent_jobs,
        ..QueueConfig::default()
    });
    let tasks = Arc::new(RecordingTaskRepository::new());
    let repositories = Repositories {
        tasks: tasks.clone(),
        results: Arc::new(InMemoryTaskResultRepository::new()),
    };

    let dispatcher = TaskDispatcher::new(
        Arc::new(registry),
        Arc::new(queue.clone()),
        repositories,
        publisher,
    );

    Harness {
        broker,
        queue,
        tasks,
        dispatcher,
    }
}

async fn wait_until_running(harness: &Harness, task_id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(handle) = harness.dispatcher.fetch(task_id).await {
                if handle.state == JobState::Running {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("作业未进入运行状态");
}

#[tokio::test]
async fn test_unsupported_type_never_reaches_queue() {
    let harness = harness(4, false);

    let err = harness
        .dispatcher
        .enqueue(TaskType::Sample, json!({}), None)
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::UnsupportedTaskType(ref t) if t == "sample"));
    assert_eq!(harness.queue.tracked_jobs().await, 0);
    assert!(harness.tasks.added().is_empty());
}

#[tokio::test]
async fn test_enqueue_persists_queued_task_and_completes() {
    let harness = harness(4, true);

    let task = harness
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 0}), Some("alice"))
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.task_type, TaskType::Sample);
    assert_eq!(task.created_by.as_deref(), Some("alice"));
    assert!(uuid::Uuid::parse_str(&task.id).is_ok());

    let handle = harness.queue.wait_for_terminal(&task.id).await.unwrap();
    assert_eq!(handle.state, JobState::Completed);

    let view = harness.dispatcher.status(&task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    let result = view.result.unwrap();
    assert_eq!(
        result["message"],
        "Task completed successfully after 0 seconds"
    );
}

#[tokio::test]
async fn test_submit_failure_marks_task_failed() {
    let harness = harness(4, true);
    harness.queue.shutdown(Duration::from_millis(10)).await;

    let err = harness
        .dispatcher
        .enqueue(TaskType::Sample, json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::QueueClosed));

    let added = harness.tasks.added();
    assert_eq!(added.len(), 1);
    let stored = harness.tasks.get(&added[0]).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_status_of_unknown_task_is_not_found() {
    let harness = harness(4, true);
    let err = harness.dispatcher.status("missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_cancel_unknown_task_is_not_found() {
    let harness = harness(4, true);
    let outcome = harness.dispatcher.cancel("missing", None).await.unwrap();
    assert_eq!(outcome, CancelOutcome::NotFound);
}

#[tokio::test]
async fn test_cancel_after_completion_is_already_terminal() {
    let harness = harness(4, true);
    let task = harness
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 0}), None)
        .await
        .unwrap();
    harness.queue.wait_for_terminal(&task.id).await.unwrap();

    let outcome = harness.dispatcher.cancel(&task.id, Some("bob")).await.unwrap();
    assert_eq!(outcome, CancelOutcome::AlreadyTerminal(JobState::Completed));
}

#[tokio::test]
async fn test_cancel_of_untracked_terminal_task_is_already_terminal() {
    let harness = harness(4, true);
    harness
        .tasks
        .add(TaskCreate::queued("old", TaskType::Sample, None))
        .await
        .unwrap();
    harness
        .tasks
        .update(TaskUpdate::status("old", TaskStatus::Failed))
        .await
        .unwrap();

    let outcome = harness.dispatcher.cancel("old", None).await.unwrap();
    assert_eq!(outcome, CancelOutcome::AlreadyTerminal(JobState::Failed));
}

#[tokio::test]
async fn test_cancel_queued_job_persists_and_publishes() {
    let harness = harness(1, true);
    let mut events = harness.broker.subscribe("task_updates_*").await.unwrap();

    let running = harness
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 60}), None)
        .await
        .unwrap();
    wait_until_running(&harness, &running.id).await;

    let waiting = harness
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 60}), None)
        .await
        .unwrap();

    let outcome = harness
        .dispatcher
        .cancel(&waiting.id, Some("carol"))
        .await
        .unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled { was_running: false });

    let stored = harness.tasks.get(&waiting.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    assert_eq!(stored.cancelled_by.as_deref(), Some("carol"));
    assert!(stored.cancelled_at.is_some());

    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = events.next_message().await.unwrap();
            let event = StatusEvent::parse(&message.payload).unwrap();
            if event.task_id == waiting.id {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event.status, TaskStatus::Cancelled);

    let outcome = harness.dispatcher.cancel(&running.id, None).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled { was_running: true });
    let stored = harness.tasks.get(&running.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
}
