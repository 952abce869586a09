use std::sync::Arc;

use taskrelay_core::traits::Broker;
use taskrelay_core::{RelayError, RelayResult};
use tracing::{debug, info, instrument};

/// 基于Broker列表的Worker轮询负载均衡
///
/// 注册即追加到列表尾部，允许重复注册以增加权重；
/// 取下一个Worker时原子地将列表头部移到尾部。
pub struct WorkerRegistry {
    broker: Arc<dyn Broker>,
    list_key: String,
}

impl WorkerRegistry {
    pub fn new(broker: Arc<dyn Broker>, list_key: impl Into<String>) -> Self {
        Self {
            broker,
            list_key: list_key.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn register(&self, worker_id: &str) -> RelayResult<()> {
        if worker_id.trim().is_empty() {
            return Err(RelayError::Validation("Worker ID不能为空".to_string()));
        }
        let size = self.broker.rpush(&self.list_key, worker_id).await?;
        info!("Worker {} 注册成功，轮询列表长度: {}", worker_id, size);
        Ok(())
    }

    /// 返回下一个Worker，列表为空时返回 `None`
    #[instrument(skip(self))]
    pub async fn next_worker(&self) -> RelayResult<Option<String>> {
        let worker = self.broker.rotate_left_to_right(&self.list_key).await?;
        debug!("轮询选中Worker: {:?}", worker);
        Ok(worker)
    }

    pub async fn workers(&self) -> RelayResult<Vec<String>> {
        self.broker.list_range(&self.list_key).await
    }
}
