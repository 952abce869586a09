use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 任务队列运行时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 同时执行的任务数上限
    pub max_concurrent_jobs: usize,
    /// 终止状态的任务句柄保留时长
    pub job_retention_seconds: u64,
    /// 示例任务默认执行时长
    pub sample_task_seconds: u64,
    /// 关闭时等待在途任务的时长
    pub shutdown_timeout_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 8,
            job_retention_seconds: 500,
            sample_task_seconds: 10,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl QueueConfig {
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }
        Ok(())
    }
}

/// 状态广播配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub channel_prefix: String,
    /// 每个观察者的发送缓冲区大小
    pub observer_buffer: usize,
    /// 订阅断开后重新订阅的间隔
    pub resubscribe_delay_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "task_updates".to_string(),
            observer_buffer: 256,
            resubscribe_delay_ms: 1_000,
        }
    }
}

impl StatusConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channel_prefix.is_empty() {
            return Err(anyhow::anyhow!("状态频道前缀不能为空"));
        }
        if self
            .channel_prefix
            .chars()
            .any(|c| matches!(c, '*' | '?' | '[' | ']'))
        {
            return Err(anyhow::anyhow!("状态频道前缀不能包含通配符"));
        }
        if self.observer_buffer == 0 {
            return Err(anyhow::anyhow!("观察者缓冲区大小必须大于0"));
        }
        Ok(())
    }
}

/// 读穿缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub namespace: String,
    pub default_ttl_seconds: u64,
    pub task_status_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "taskrelay".to_string(),
            default_ttl_seconds: 120,
            task_status_ttl_seconds: 60,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            return Err(anyhow::anyhow!("缓存命名空间不能为空"));
        }
        if self.enabled && (self.default_ttl_seconds == 0 || self.task_status_ttl_seconds == 0) {
            return Err(anyhow::anyhow!("缓存TTL必须大于0"));
        }
        Ok(())
    }
}

/// 分布式锁配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub key_prefix: String,
    /// 锁自动过期时间
    pub timeout_seconds: u64,
    pub retry_interval_ms: u64,
    /// 阻塞获取的最长等待时间，未设置时一直等待
    pub blocking_timeout_seconds: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "lock".to_string(),
            timeout_seconds: 300,
            retry_interval_ms: 100,
            blocking_timeout_seconds: None,
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("锁超时时间必须大于0"));
        }
        if self.retry_interval_ms == 0 {
            return Err(anyhow::anyhow!("锁重试间隔必须大于0"));
        }
        Ok(())
    }
}

/// Worker轮询列表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerRegistryConfig {
    pub list_key: String,
}

impl Default for WorkerRegistryConfig {
    fn default() -> Self {
        Self {
            list_key: "worker_list".to_string(),
        }
    }
}

impl WorkerRegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.list_key.is_empty() {
            return Err(anyhow::anyhow!("Worker列表键不能为空"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(QueueConfig::default().validate().is_ok());
        assert!(StatusConfig::default().validate().is_ok());
        assert!(CacheConfig::default().validate().is_ok());
        assert!(LockConfig::default().validate().is_ok());
        assert!(WorkerRegistryConfig::default().validate().is_ok());
        assert_eq!(LockConfig::default().timeout_seconds, 300);
        assert_eq!(CacheConfig::default().default_ttl_seconds, 120);
    }

    #[test]
    fn test_channel_prefix_rejects_wildcards() {
        let config = StatusConfig {
            channel_prefix: "task_*".to_string(),
            ..StatusConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_cache_allows_zero_ttl() {
        let config = CacheConfig {
            enabled: false,
            default_ttl_seconds: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
