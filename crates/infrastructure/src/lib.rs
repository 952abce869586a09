//! # taskrelay-infrastructure
//!
//! Broker实现（Redis / 内存）、分布式锁、读穿缓存与持久化仓储。

pub mod cache;
pub mod database;
pub mod in_memory_broker;
pub mod lock;
pub mod redis_broker;

use std::sync::Arc;

use taskrelay_core::config::{BrokerConfig, BrokerKind};
use taskrelay_core::traits::Broker;
use taskrelay_core::RelayResult;

pub use cache::{cache_key, CacheStats, ReadThroughCache};
pub use database::Repositories;
pub use in_memory_broker::InMemoryBroker;
pub use lock::{DistributedLock, LockManager, LockOptions};
pub use redis_broker::RedisBroker;

/// 根据配置创建Broker
pub async fn create_broker(config: &BrokerConfig) -> RelayResult<Arc<dyn Broker>> {
    match config.kind {
        BrokerKind::Redis => Ok(Arc::new(RedisBroker::connect(config).await?)),
        BrokerKind::Memory => Ok(Arc::new(InMemoryBroker::new())),
    }
}
