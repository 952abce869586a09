//! 状态扇出管道
//!
//! 进程内唯一的后台任务：订阅所有任务状态频道，持久化状态变更和结果，
//! 使任务状态缓存失效，再把原始消息转发给观察者。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskrelay_core::models::{StatusChannels, StatusEvent, TaskResultCreate, TaskStatus, TaskUpdate};
use taskrelay_core::traits::{Broker, BrokerMessage, Subscription, TaskRepository, TaskResultRepository};
use taskrelay_core::{RelayError, RelayResult};
use taskrelay_infrastructure::{ReadThroughCache, Repositories};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::ObserverHub;
use crate::task_dispatcher::TASK_STATUS_OPERATION;

pub struct StatusPipeline {
    broker: Arc<dyn Broker>,
    tasks: Arc<dyn TaskRepository>,
    results: Arc<dyn TaskResultRepository>,
    hub: Arc<ObserverHub>,
    channels: StatusChannels,
    cache: Option<Arc<ReadThroughCache>>,
    resubscribe_delay: Duration,
    started: AtomicBool,
}

impl StatusPipeline {
    pub fn new(
        broker: Arc<dyn Broker>,
        repositories: Repositories,
        hub: Arc<ObserverHub>,
        channels: StatusChannels,
    ) -> Self {
        Self {
            broker,
            tasks: repositories.tasks,
            results: repositories.results,
            hub,
            channels,
            cache: None,
            resubscribe_delay: Duration::from_secs(1),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ReadThroughCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// 启动管道
    ///
    /// 返回前订阅已经建立，之后发布的事件不会丢失。每个管道只能启动一次。
    pub async fn start(self: &Arc<Self>, token: CancellationToken) -> RelayResult<PipelineHandle> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RelayError::PipelineAlreadyRunning);
        }

        let pattern = self.channels.pattern();
        let subscription = match self.broker.subscribe(&pattern).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        info!("启动状态扇出管道，订阅模式: {}", pattern);

        let pipeline = Arc::clone(self);
        let loop_token = token.clone();
        let join = tokio::spawn(async move { pipeline.run(subscription, loop_token).await });

        Ok(PipelineHandle { token, join })
    }

    async fn run(self: Arc<Self>, mut subscription: Box<dyn Subscription>, token: CancellationToken) {
        loop {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                message = subscription.next_message() => message,
            };

            match message {
                Some(message) => self.handle_message(&message).await,
                None => {
                    warn!(
                        "状态订阅已断开，{:?} 后重新订阅",
                        self.resubscribe_delay
                    );
                    if let Err(e) = subscription.unsubscribe().await {
                        debug!("释放断开的订阅失败: {}", e);
                    }
                    match self.resubscribe(&token).await {
                        Some(renewed) => subscription = renewed,
                        None => {
                            info!("状态扇出管道已停止");
                            return;
                        }
                    }
                }
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!("取消状态订阅失败: {}", e);
        }
        info!("状态扇出管道已停止");
    }

    async fn resubscribe(&self, token: &CancellationToken) -> Option<Box<dyn Subscription>> {
        let pattern = self.channels.pattern();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
            match self.broker.subscribe(&pattern).await {
                Ok(subscription) => {
                    info!("重新订阅状态频道成功: {}", pattern);
                    return Some(subscription);
                }
                Err(e) => warn!("重新订阅状态频道失败: {}", e),
            }
        }
    }

    async fn handle_message(&self, message: &BrokerMessage) {
        let event = match StatusEvent::parse(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("丢弃频道 {} 上格式错误的状态消息: {}", message.channel, e);
                metrics::counter!("taskrelay_pipeline_dropped_total").increment(1);
                return;
            }
        };
        debug!("收到任务 {} 的状态更新: {}", event.task_id, event.status);

        if let Err(e) = self.persist(&event).await {
            error!("持久化任务 {} 的状态 {} 失败: {}", event.task_id, event.status, e);
        }

        if let Some(cache) = &self.cache {
            cache
                .invalidate(TASK_STATUS_OPERATION, event.task_id.as_str())
                .await;
        }

        self.hub
            .publish_task_event(&event.task_id, &message.payload)
            .await;
        metrics::counter!("taskrelay_pipeline_processed_total").increment(1);
    }

    async fn persist(&self, event: &StatusEvent) -> RelayResult<()> {
        let task = self.tasks.get(&event.task_id).await?;

        if !task.status.can_transition_to(event.status) {
            warn!(
                "忽略任务 {} 的无效状态转换: {} -> {}",
                event.task_id, task.status, event.status
            );
            return Ok(());
        }

        if task.status != event.status {
            let update = match event.status {
                TaskStatus::Cancelled => TaskUpdate::cancelled(&event.task_id, None),
                status => TaskUpdate::status(&event.task_id, status),
            };
            self.tasks.update(update).await?;
        }

        if event.status == TaskStatus::Completed {
            if let Some(result) = &event.result {
                let create = TaskResultCreate {
                    task_id: event.task_id.clone(),
                    result: result.clone(),
                };
                match self.results.add(create).await {
                    Ok(_) => debug!("任务 {} 的结果已保存", event.task_id),
                    Err(RelayError::TaskResultAlreadyExists { .. }) => {
                        debug!("任务 {} 的结果已存在", event.task_id)
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }
}

/// 运行中管道的控制句柄
#[derive(Debug)]
pub struct PipelineHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 停止管道并等待当前消息处理完成
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!("状态扇出管道任务异常退出: {}", e);
        }
    }
}
