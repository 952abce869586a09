use std::sync::Arc;

use taskrelay_core::models::{StatusChannels, StatusEvent, TaskStatus};
use taskrelay_core::traits::Broker;
use taskrelay_core::RelayResult;
use tracing::debug;

/// 将任务状态事件发布到对应任务的频道
#[derive(Clone)]
pub struct StatusPublisher {
    broker: Arc<dyn Broker>,
    channels: StatusChannels,
}

impl StatusPublisher {
    pub fn new(broker: Arc<dyn Broker>, channels: StatusChannels) -> Self {
        Self { broker, channels }
    }

    pub async fn publish(&self, event: &StatusEvent) -> RelayResult<()> {
        let channel = self.channels.channel_for(&event.task_id);
        let receivers = self.broker.publish(&channel, &event.to_payload()?).await?;
        debug!(
            "发布任务 {} 状态 {} 到 {} ({} 个接收者)",
            event.task_id, event.status, channel, receivers
        );
        Ok(())
    }

    pub async fn publish_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> RelayResult<()> {
        let mut event = StatusEvent::new(task_id, status);
        event.result = result;
        self.publish(&event).await
    }
}
