//! 基于Broker的分布式互斥锁
//!
//! 获取锁即 `SET key token NX PX timeout`，释放锁为按token比较删除。
//! 超时时间保证持有者崩溃后锁最终会自动释放。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use taskrelay_core::config::LockConfig;
use taskrelay_core::traits::Broker;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// 获取锁的参数
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// 锁的自动过期时间
    pub timeout: Duration,
    /// 锁被占用时是否等待
    pub blocking: bool,
    /// 阻塞等待的最长时间，`None` 表示一直等待
    pub blocking_timeout: Option<Duration>,
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::from_config(&LockConfig::default())
    }
}

impl LockOptions {
    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_seconds),
            blocking: true,
            blocking_timeout: config.blocking_timeout_seconds.map(Duration::from_secs),
            retry_interval: Duration::from_millis(config.retry_interval_ms),
        }
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_blocking_timeout(mut self, blocking_timeout: Duration) -> Self {
        self.blocking = true;
        self.blocking_timeout = Some(blocking_timeout);
        self
    }
}

/// 单个锁实例，持有唯一的所有者token
pub struct DistributedLock {
    broker: Arc<dyn Broker>,
    key: String,
    token: String,
    options: LockOptions,
}

impl DistributedLock {
    pub fn new(broker: Arc<dyn Broker>, key: impl Into<String>, options: LockOptions) -> Self {
        Self {
            broker,
            key: key.into(),
            token: Uuid::new_v4().to_string(),
            options,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// 尝试获取锁
    ///
    /// Broker故障时记录日志并返回 `false`，调用方不会获得锁。
    pub async fn acquire(&self) -> bool {
        let deadline = self
            .options
            .blocking_timeout
            .map(|limit| Instant::now() + limit);

        loop {
            match self
                .broker
                .set_if_absent(&self.key, self.token.as_bytes(), self.options.timeout)
                .await
            {
                Ok(true) => {
                    debug!("获取锁成功: {}", self.key);
                    return true;
                }
                Ok(false) => {
                    if !self.options.blocking {
                        debug!("锁已被占用: {}", self.key);
                        return false;
                    }
                }
                Err(e) => {
                    error!("获取锁 {} 时Broker出错: {}", self.key, e);
                    return false;
                }
            }

            let delay = self.next_delay();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!("等待锁超时: {}", self.key);
                    return false;
                }
                tokio::time::sleep(delay.min(deadline - now)).await;
            } else {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// 释放锁，仅当仍由当前token持有时删除
    pub async fn release(&self) -> bool {
        match self
            .broker
            .compare_and_delete(&self.key, self.token.as_bytes())
            .await
        {
            Ok(true) => {
                debug!("释放锁: {}", self.key);
                true
            }
            Ok(false) => {
                warn!("尝试释放未持有的锁: {}", self.key);
                false
            }
            Err(e) => {
                error!("释放锁 {} 时Broker出错: {}", self.key, e);
                false
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let base = self.options.retry_interval;
        let jitter_ms = base.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// 作用域结束时释放锁，包括future被取消的情况
struct ReleaseGuard {
    lock: Option<Arc<DistributedLock>>,
}

impl ReleaseGuard {
    fn disarm(&mut self) -> Option<Arc<DistributedLock>> {
        self.lock.take()
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    lock.release().await;
                });
            } else {
                warn!("运行时已关闭，锁 {} 将在超时后自动释放", lock.key());
            }
        }
    }
}

/// 分布式锁工厂
#[derive(Clone)]
pub struct LockManager {
    broker: Arc<dyn Broker>,
    key_prefix: String,
    defaults: LockOptions,
}

impl LockManager {
    pub fn new(broker: Arc<dyn Broker>, config: &LockConfig) -> Self {
        Self {
            broker,
            key_prefix: config.key_prefix.clone(),
            defaults: LockOptions::from_config(config),
        }
    }

    pub fn default_options(&self) -> LockOptions {
        self.defaults.clone()
    }

    fn build_key(&self, name: &str) -> String {
        if self.key_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", self.key_prefix, name)
        }
    }

    pub fn lock(&self, name: &str, options: LockOptions) -> DistributedLock {
        DistributedLock::new(Arc::clone(&self.broker), self.build_key(name), options)
    }

    /// 在锁的作用域内执行 `body`
    ///
    /// `body` 接收是否成功获取锁；仅在获取成功时于退出（含取消）后释放。
    pub async fn with_lock<F, Fut, T>(&self, name: &str, options: LockOptions, body: F) -> T
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = Arc::new(self.lock(name, options));
        let acquired = lock.acquire().await;

        let mut guard = ReleaseGuard {
            lock: acquired.then(|| Arc::clone(&lock)),
        };

        let output = body(acquired).await;

        if let Some(lock) = guard.disarm() {
            lock.release().await;
        }
        output
    }
}
