use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use taskrelay_core::config::CacheConfig;
use taskrelay_core::models::{StatusChannels, StatusEvent, TaskCreate, TaskStatus, TaskType};
use taskrelay_core::traits::Broker;
use taskrelay_core::RelayError;
use taskrelay_dispatcher::{
    ObserverConnection, ObserverHub, ObserverScope, StatusPipeline, TASK_STATUS_OPERATION,
};
use taskrelay_infrastructure::{cache_key, InMemoryBroker, ReadThroughCache, Repositories};
use tokio_util::sync::CancellationToken;

struct Harness {
    broker: InMemoryBroker,
    repositories: Repositories,
    hub: Arc<ObserverHub>,
    pipeline: Arc<StatusPipeline>,
}

fn harness() -> Harness {
    let broker = InMemoryBroker::new();
    let repositories = Repositories::in_memory();
    let hub = Arc::new(ObserverHub::new(32));
    let pipeline = StatusPipeline::new(
        Arc::new(broker.clone()),
        repositories.clone(),
        hub.clone(),
        StatusChannels::default(),
    )
    .with_resubscribe_delay(Duration::from_millis(10));

    Harness {
        broker,
        repositories,
        hub,
        pipeline: Arc::new(pipeline),
    }
}

async fn publish(broker: &InMemoryBroker, task_id: &str, payload: &str) -> u64 {
    broker
        .publish(&format!("task_updates_{task_id}"), payload)
        .await
        .unwrap()
}

async fn publish_event(broker: &InMemoryBroker, event: StatusEvent) -> String {
    let payload = event.to_payload().unwrap();
    publish(broker, &event.task_id, &payload).await;
    payload
}

async fn receive(observer: &mut ObserverConnection) -> String {
    tokio::time::timeout(Duration::from_secs(5), observer.receiver.recv())
        .await
        .expect("等待观察者消息超时")
        .expect("观察者通道已关闭")
}

async fn seed_task(repositories: &Repositories, id: &str) {
    repositories
        .tasks
        .add(TaskCreate::queued(id, TaskType::Sample, None))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let harness = harness();
    let handle = harness
        .pipeline
        .start(CancellationToken::new())
        .await
        .unwrap();

    let err = harness
        .pipeline
        .start(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::PipelineAlreadyRunning));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_events_published_after_start_are_persisted_and_forwarded() {
    let harness = harness();
    seed_task(&harness.repositories, "t1").await;
    let mut observer = harness.hub.connect(ObserverScope::All).await;
    let handle = harness
        .pipeline
        .start(CancellationToken::new())
        .await
        .unwrap();

    let running = publish_event(&harness.broker, StatusEvent::new("t1", TaskStatus::Running)).await;
    assert_eq!(receive(&mut observer).await, running);
    let stored = harness.repositories.tasks.get("t1").await.unwrap();
    assert_eq!(stored.status, TaskStatus::Running);

    let completed = publish_event(
        &harness.broker,
        StatusEvent::new("t1", TaskStatus::Completed).with_result(json!({"result": 7})),
    )
    .await;
    assert_eq!(receive(&mut observer).await, completed);

    let stored = harness.repositories.tasks.get("t1").await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    let result = harness.repositories.results.get("t1").await.unwrap();
    assert_eq!(result.result, json!({"result": 7}));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let harness = harness();
    seed_task(&harness.repositories, "t1").await;
    let mut observer = harness.hub.connect(ObserverScope::All).await;
    let handle = harness
        .pipeline
        .start(CancellationToken::new())
        .await
        .unwrap();

    publish(&harness.broker, "t1", "not json").await;
    publish(&harness.broker, "t1", r#"{"status": "running"}"#).await;
    publish(&harness.broker, "t1", r#"{"task_id": "", "status": "running"}"#).await;
    publish(&harness.broker, "t1", r#"{"task_id": "t1", "status": "exploded"}"#).await;
    let valid = publish_event(&harness.broker, StatusEvent::new("t1", TaskStatus::Running)).await;

    assert_eq!(receive(&mut observer).await, valid);
    assert!(observer.receiver.try_recv().is_err());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_persistence_failure_still_forwards() {
    let harness = harness();
    let mut observer = harness.hub.connect(ObserverScope::All).await;
    let handle = harness
        .pipeline
        .start(CancellationToken::new())
        .await
        .unwrap();

    let payload = publish_event(
        &harness.broker,
        StatusEvent::new("ghost", TaskStatus::Completed).with_result(json!(1)),
    )
    .await;

    assert_eq!(receive(&mut observer).await, payload);
    assert!(harness.repositories.results.get("ghost").await.is_err());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_transition_out_of_terminal_state_is_not_persisted() {
    let harness = harness();
    seed_task(&harness.repositories, "t1").await;
    let mut observer = harness.hub.connect(ObserverScope::All).await;
    let handle = harness
        .pipeline
        .start(CancellationToken::new())
        .await
        .unwrap();

    publish_event(&harness.broker, StatusEvent::new("t1", TaskStatus::Cancelled)).await;
    receive(&mut observer).await;

    let late = publish_event(&harness.broker, StatusEvent::new("t1", TaskStatus::Running)).await;
    assert_eq!(receive(&mut observer).await, late);

    let stored = harness.repositories.tasks.get("t1").await.unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_detail_is_forwarded_but_not_stored() {
    let harness = harness();
    seed_task(&harness.repositories, "t1").await;
    let mut observer = harness.hub.connect(ObserverScope::Task("t1".into())).await;
    let handle = harness
        .pipeline
        .start(CancellationToken::new())
        .await
        .unwrap();

    let payload = publish_event(
        &harness.broker,
        StatusEvent::new("t1", TaskStatus::Failed).with_result(Value::String("boom".into())),
    )
    .await;
    assert_eq!(receive(&mut observer).await, payload);

    let stored = harness.repositories.tasks.get("t1").await.unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(harness.repositories.results.get("t1").await.unwrap_err().is_not_found());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_status_change_invalidates_cached_status() {
    let broker = InMemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let repositories = Repositories::in_memory();
    let hub = Arc::new(ObserverHub::new(8));
    let config = CacheConfig::default();
    let cache = Arc::new(ReadThroughCache::new(shared.clone(), &config));
    let pipeline = Arc::new(
        StatusPipeline::new(shared, repositories.clone(), hub.clone(), StatusChannels::default())
            .with_cache(cache.clone()),
    );
    seed_task(&repositories, "t1").await;

    let key = cache_key(&config.namespace, TASK_STATUS_OPERATION, "t1").unwrap();
    broker
        .set_with_ttl(&key, b"{\"id\":\"t1\",\"status\":\"queued\"}", Duration::from_secs(60))
        .await
        .unwrap();

    let mut observer = hub.connect(ObserverScope::All).await;
    let handle = pipeline.start(CancellationToken::new()).await.unwrap();
    publish_event(&broker, StatusEvent::new("t1", TaskStatus::Running)).await;
    receive(&mut observer).await;

    assert!(broker.get(&key).await.unwrap().is_none());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_unsubscribes() {
    let harness = harness();
    let token = CancellationToken::new();
    let handle = harness.pipeline.start(token.clone()).await.unwrap();
    assert_eq!(harness.broker.subscriber_count().await, 1);

    handle.shutdown().await;

    assert!(token.is_cancelled());
    assert_eq!(harness.broker.subscriber_count().await, 0);
}

#[tokio::test]
async fn test_resubscribes_after_connection_loss() {
    let harness = harness();
    seed_task(&harness.repositories, "t1").await;
    let mut observer = harness.hub.connect(ObserverScope::All).await;
    let handle = harness
        .pipeline
        .start(CancellationToken::new())
        .await
        .unwrap();

    harness.broker.disconnect_subscribers().await;

    let payload = StatusEvent::new("t1", TaskStatus::Running)
        .to_payload()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while publish(&harness.broker, "t1", &payload).await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("管道未重新订阅");

    assert_eq!(receive(&mut observer).await, payload);
    handle.shutdown().await;
}
