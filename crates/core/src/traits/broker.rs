use std::time::Duration;

use async_trait::async_trait;

use crate::RelayResult;

/// 从订阅中收到的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// 判断订阅目标是否为glob模式
pub fn is_pattern(channel_or_pattern: &str) -> bool {
    channel_or_pattern
        .chars()
        .any(|c| matches!(c, '*' | '?' | '['))
}

/// 一个活跃的频道或模式订阅
///
/// 订阅独占底层连接，必须通过 [`Subscription::unsubscribe`] 显式释放。
#[async_trait]
pub trait Subscription: Send {
    /// 等待下一条消息，连接断开时返回 `None`
    async fn next_message(&mut self) -> Option<BrokerMessage>;

    /// 取消订阅并释放连接
    async fn unsubscribe(self: Box<Self>) -> RelayResult<()>;
}

/// Broker抽象接口：带过期的键值、列表与发布订阅
///
/// 所有操作都是可能失败或超时的网络调用，失败以可重试错误返回。
#[async_trait]
pub trait Broker: Send + Sync {
    /// 读取键值
    async fn get(&self, key: &str) -> RelayResult<Option<Vec<u8>>>;

    /// 写入键值并设置过期时间
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> RelayResult<()>;

    /// 键不存在时写入，返回是否写入成功
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> RelayResult<bool>;

    /// 删除键，返回键是否存在
    async fn delete(&self, key: &str) -> RelayResult<bool>;

    /// 值等于 `expected` 时原子删除
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> RelayResult<bool>;

    /// 追加到列表尾部，返回列表长度
    async fn rpush(&self, key: &str, value: &str) -> RelayResult<u64>;

    /// 原子地弹出列表头部并追加到尾部，列表为空时返回 `None`
    async fn rotate_left_to_right(&self, key: &str) -> RelayResult<Option<String>>;

    /// 读取整个列表
    async fn list_range(&self, key: &str) -> RelayResult<Vec<String>>;

    /// 发布消息，返回接收者数量
    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<u64>;

    /// 订阅频道，参数含glob字符时按模式订阅
    async fn subscribe(&self, channel_or_pattern: &str) -> RelayResult<Box<dyn Subscription>>;

    /// 健康检查
    async fn ping(&self) -> RelayResult<()>;
}
