//! 分发、执行、状态扇出和观察者广播的端到端场景

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use taskrelay_core::config::{CacheConfig, QueueConfig};
use taskrelay_core::models::{StatusChannels, StatusEvent, TaskStatus, TaskType};
use taskrelay_core::traits::{Broker, Subscription};
use taskrelay_core::{RelayError, RelayResult};
use taskrelay_dispatcher::{
    ObserverConnection, ObserverHub, ObserverScope, PipelineHandle, StatusPipeline,
    TaskDispatcher,
};
use taskrelay_infrastructure::{InMemoryBroker, ReadThroughCache, Repositories};
use taskrelay_worker::{
    CancelOutcome, JobState, LocalQueue, QueueRuntime, StatusPublisher, TaskContext, TaskExecutor,
    TaskRegistry,
};
use tokio_util::sync::CancellationToken;

struct BrokenTask;

#[async_trait]
impl TaskExecutor for BrokenTask {
    fn name(&self) -> &str {
        "broken"
    }

    async fn execute(&self, _context: &TaskContext) -> RelayResult<Value> {
        Err(RelayError::TaskExecution("disk full".to_string()))
    }
}

/// 写缓存有延迟的Broker，模拟缓存写入晚于失效到达
#[derive(Clone)]
struct SlowSetBroker {
    inner: InMemoryBroker,
    delay: Duration,
}

#[async_trait]
impl Broker for SlowSetBroker {
    async fn get(&self, key: &str) -> RelayResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> RelayResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> RelayResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> RelayResult<bool> {
        self.inner.delete(key).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> RelayResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn rpush(&self, key: &str, value: &str) -> RelayResult<u64> {
        self.inner.rpush(key, value).await
    }

    async fn rotate_left_to_right(&self, key: &str) -> RelayResult<Option<String>> {
        self.inner.rotate_left_to_right(key).await
    }

    async fn list_range(&self, key: &str) -> RelayResult<Vec<String>> {
        self.inner.list_range(key).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<u64> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel_or_pattern: &str) -> RelayResult<Box<dyn Subscription>> {
        self.inner.subscribe(channel_or_pattern).await
    }

    async fn ping(&self) -> RelayResult<()> {
        self.inner.ping().await
    }
}

struct System {
    queue: LocalQueue,
    repositories: Repositories,
    hub: Arc<ObserverHub>,
    dispatcher: Arc<TaskDispatcher>,
    pipeline: PipelineHandle,
}

fn sample_registry(publisher: StatusPublisher) -> TaskRegistry {
    TaskRegistry::with_builtin_tasks(publisher, Duration::from_secs(10))
}

async fn system(registry: impl FnOnce(StatusPublisher) -> TaskRegistry) -> System {
    system_with(
        Arc::new(InMemoryBroker::new()),
        QueueConfig::default(),
        registry,
    )
    .await
}

async fn system_with(
    broker: Arc<dyn Broker>,
    queue_config: QueueConfig,
    registry: impl FnOnce(StatusPublisher) -> TaskRegistry,
) -> System {
    let channels = StatusChannels::default();
    let repositories = Repositories::in_memory();
    let hub = Arc::new(ObserverHub::new(64));
    let cache = Arc::new(ReadThroughCache::new(broker.clone(), &CacheConfig::default()));

    let pipeline = Arc::new(
        StatusPipeline::new(
            broker.clone(),
            repositories.clone(),
            hub.clone(),
            channels.clone(),
        )
        .with_cache(cache.clone()),
    );
    let pipeline = pipeline.start(CancellationToken::new()).await.unwrap();

    let publisher = StatusPublisher::new(broker, channels);
    let queue = LocalQueue::new(&queue_config);
    let dispatcher = TaskDispatcher::new(
        Arc::new(registry(publisher.clone())),
        Arc::new(queue.clone()),
        repositories.clone(),
        publisher,
    )
    .with_cache(cache, Duration::from_secs(60));

    System {
        queue,
        repositories,
        hub,
        dispatcher: Arc::new(dispatcher),
        pipeline,
    }
}

async fn next_event(observer: &mut ObserverConnection) -> StatusEvent {
    let payload = tokio::time::timeout(Duration::from_secs(10), observer.receiver.recv())
        .await
        .expect("等待状态事件超时")
        .expect("观察者通道已关闭");
    StatusEvent::parse(&payload).unwrap()
}

#[tokio::test]
async fn test_running_then_completed_with_status_read_back() {
    let system = system(sample_registry).await;
    let mut global = system.hub.connect(ObserverScope::All).await;
    let mut unrelated = system.hub.connect(ObserverScope::Task("other".into())).await;

    let task = system
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 1}), Some("alice"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Queued);

    let running = next_event(&mut global).await;
    assert_eq!(running.task_id, task.id);
    assert_eq!(running.status, TaskStatus::Running);

    let view = system.dispatcher.cached_status(&task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Running);
    assert!(view.result.is_none());

    let completed = next_event(&mut global).await;
    assert_eq!(completed.status, TaskStatus::Completed);
    let result = completed.result.clone().unwrap();
    let value = result["result"].as_u64().unwrap();
    assert!(value <= 100);
    assert_eq!(
        result["message"],
        "Task completed successfully after 1 seconds"
    );

    let view = system.dispatcher.cached_status(&task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result, Some(result.clone()));

    let stored = system.repositories.tasks.get(&task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    let stored_result = system.repositories.results.get(&task.id).await.unwrap();
    assert_eq!(stored_result.result, result);

    let outcome = system.dispatcher.cancel(&task.id, Some("alice")).await.unwrap();
    assert_eq!(outcome, CancelOutcome::AlreadyTerminal(JobState::Completed));

    assert!(unrelated.receiver.try_recv().is_err());
    system.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_failing_body_is_reported_as_failed() {
    let system = system(|publisher| {
        let mut registry = TaskRegistry::new();
        registry.register_published(TaskType::Sample, Arc::new(BrokenTask), publisher);
        registry
    })
    .await;
    let mut global = system.hub.connect(ObserverScope::All).await;

    let task = system
        .dispatcher
        .enqueue(TaskType::Sample, Value::Null, None)
        .await
        .unwrap();

    assert_eq!(next_event(&mut global).await.status, TaskStatus::Running);
    let failed = next_event(&mut global).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.result, Some(Value::String("disk full".into())));

    let handle = system.queue.wait_for_terminal(&task.id).await.unwrap();
    assert_eq!(handle.state, JobState::Failed);

    let view = system.dispatcher.cached_status(&task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.result, Some(Value::String("disk full".into())));

    system.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_task_notifies_scoped_observer() {
    let system = system(sample_registry).await;
    let mut global = system.hub.connect(ObserverScope::All).await;

    let task = system
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 60}), None)
        .await
        .unwrap();
    let mut scoped = system
        .hub
        .connect(ObserverScope::Task(task.id.clone()))
        .await;

    assert_eq!(next_event(&mut global).await.status, TaskStatus::Running);

    let outcome = system.dispatcher.cancel(&task.id, Some("bob")).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled { was_running: true });

    let cancelled = loop {
        let event = next_event(&mut scoped).await;
        if event.status == TaskStatus::Cancelled {
            break event;
        }
    };
    assert_eq!(cancelled.task_id, task.id);

    let stored = system.repositories.tasks.get(&task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    assert_eq!(stored.cancelled_by.as_deref(), Some("bob"));

    system.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_status_read_during_run_does_not_outlive_completion() {
    let broker = SlowSetBroker {
        inner: InMemoryBroker::new(),
        delay: Duration::from_millis(1500),
    };
    let system = system_with(Arc::new(broker), QueueConfig::default(), sample_registry).await;
    let mut global = system.hub.connect(ObserverScope::All).await;

    let task = system
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 1}), None)
        .await
        .unwrap();
    assert_eq!(next_event(&mut global).await.status, TaskStatus::Running);

    // 运行中的读取；若它写缓存，写入会晚于完成事件的失效到达
    let reader = {
        let dispatcher = Arc::clone(&system.dispatcher);
        let id = task.id.clone();
        tokio::spawn(async move { dispatcher.cached_status(&id).await })
    };

    let completed = next_event(&mut global).await;
    assert_eq!(completed.status, TaskStatus::Completed);

    let view = system.dispatcher.cached_status(&task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result, completed.result);

    let during = reader.await.unwrap().unwrap();
    assert_eq!(during.status, TaskStatus::Running);

    let view = system.dispatcher.cached_status(&task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result, completed.result);

    system.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_dispatcher_shutdown_persists_cancelled_jobs() {
    let queue_config = QueueConfig {
        max_concurrent_jobs: 1,
        ..QueueConfig::default()
    };
    let system = system_with(
        Arc::new(InMemoryBroker::new()),
        queue_config,
        sample_registry,
    )
    .await;
    let mut global = system.hub.connect(ObserverScope::All).await;

    let running = system
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 60}), None)
        .await
        .unwrap();
    assert_eq!(next_event(&mut global).await.status, TaskStatus::Running);

    let waiting = system
        .dispatcher
        .enqueue(TaskType::Sample, json!({"seconds": 60}), None)
        .await
        .unwrap();
    let mut waiting_observer = system
        .hub
        .connect(ObserverScope::Task(waiting.id.clone()))
        .await;

    system.dispatcher.shutdown(Duration::from_secs(5)).await;

    let cancelled = next_event(&mut waiting_observer).await;
    assert_eq!(cancelled.task_id, waiting.id);
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    for id in [&running.id, &waiting.id] {
        let stored = system.repositories.tasks.get(id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert!(stored.cancelled_at.is_some());
    }

    let handle = system.queue.fetch(&waiting.id).await.unwrap();
    assert_eq!(handle.state, JobState::Cancelled);
    assert!(handle.started_at.is_none());

    system.pipeline.shutdown().await;
}
