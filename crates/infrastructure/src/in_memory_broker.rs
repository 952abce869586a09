use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskrelay_core::traits::{is_pattern, Broker, BrokerMessage, Subscription};
use taskrelay_core::{RelayError, RelayResult};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info};

/// 内存Broker实现
///
/// 在单进程内提供与Redis一致的语义：键过期、列表轮转、频道与模式订阅。
/// 适用于嵌入式部署和测试，可通过 [`InMemoryBroker::set_available`] 模拟故障。
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<BrokerState>,
    available: AtomicBool,
}

#[derive(Default)]
struct BrokerState {
    values: HashMap<String, StoredValue>,
    lists: HashMap<String, VecDeque<String>>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
}

struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Subscriber {
    id: u64,
    target: String,
    pattern: bool,
    sender: mpsc::UnboundedSender<BrokerMessage>,
}

impl Subscriber {
    fn matches(&self, channel: &str) -> bool {
        if self.pattern {
            glob_match(self.target.as_bytes(), channel.as_bytes())
        } else {
            self.target == channel
        }
    }
}

impl BrokerState {
    /// 读取未过期的值，顺带清理过期键
    fn live_value(&mut self, key: &str) -> Option<&StoredValue> {
        let now = Instant::now();
        if self.values.get(key).is_some_and(|v| v.is_expired(now)) {
            self.values.remove(key);
        }
        self.values.get(key)
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        info!("创建内存Broker");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// 切换可用状态，不可用时所有操作返回Broker错误
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// 断开所有订阅，订阅端随后收到流结束
    pub async fn disconnect_subscribers(&self) {
        let mut state = self.inner.state.lock().await;
        let dropped = state.subscribers.len();
        state.subscribers.clear();
        debug!("断开 {} 个订阅", dropped);
    }

    /// 当前活跃订阅数量
    pub async fn subscriber_count(&self) -> usize {
        let state = self.inner.state.lock().await;
        state
            .subscribers
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }

    fn ensure_available(&self, operation: &str) -> RelayResult<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::Broker(format!("{operation} failed: broker unavailable")))
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn get(&self, key: &str) -> RelayResult<Option<Vec<u8>>> {
        self.ensure_available("GET")?;
        let mut state = self.inner.state.lock().await;
        Ok(state.live_value(key).map(|v| v.data.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> RelayResult<()> {
        self.ensure_available("SET")?;
        let mut state = self.inner.state.lock().await;
        state.values.insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> RelayResult<bool> {
        self.ensure_available("SET NX")?;
        let mut state = self.inner.state.lock().await;
        if state.live_value(key).is_some() {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> RelayResult<bool> {
        self.ensure_available("DEL")?;
        let mut state = self.inner.state.lock().await;
        let existed = state.live_value(key).is_some();
        state.values.remove(key);
        let list_existed = state.lists.remove(key).is_some();
        Ok(existed || list_existed)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> RelayResult<bool> {
        self.ensure_available("EVALSHA")?;
        let mut state = self.inner.state.lock().await;
        let owned = state
            .live_value(key)
            .is_some_and(|v| v.data.as_slice() == expected);
        if owned {
            state.values.remove(key);
        }
        Ok(owned)
    }

    async fn rpush(&self, key: &str, value: &str) -> RelayResult<u64> {
        self.ensure_available("RPUSH")?;
        let mut state = self.inner.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn rotate_left_to_right(&self, key: &str) -> RelayResult<Option<String>> {
        self.ensure_available("LMOVE")?;
        let mut state = self.inner.state.lock().await;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(None);
        };
        let head = list.pop_front();
        if let Some(value) = &head {
            list.push_back(value.clone());
        }
        Ok(head)
    }

    async fn list_range(&self, key: &str) -> RelayResult<Vec<String>> {
        self.ensure_available("LRANGE")?;
        let state = self.inner.state.lock().await;
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<u64> {
        self.ensure_available("PUBLISH")?;
        let mut state = self.inner.state.lock().await;
        let mut delivered = 0u64;
        state.subscribers.retain(|subscriber| {
            if !subscriber.matches(channel) {
                return !subscriber.sender.is_closed();
            }
            let message = BrokerMessage {
                channel: channel.to_string(),
                payload: payload.to_string(),
            };
            match subscriber.sender.send(message) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        Ok(delivered)
    }

    async fn subscribe(&self, channel_or_pattern: &str) -> RelayResult<Box<dyn Subscription>> {
        self.ensure_available("SUBSCRIBE")?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock().await;
        state.next_subscriber_id += 1;
        let id = state.next_subscriber_id;
        state.subscribers.push(Subscriber {
            id,
            target: channel_or_pattern.to_string(),
            pattern: is_pattern(channel_or_pattern),
            sender,
        });
        debug!("内存Broker订阅: {}", channel_or_pattern);

        Ok(Box::new(InMemorySubscription {
            id,
            receiver,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn ping(&self) -> RelayResult<()> {
        self.ensure_available("PING")
    }
}

struct InMemorySubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<BrokerMessage>,
    inner: Arc<Inner>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_message(&mut self) -> Option<BrokerMessage> {
        self.receiver.recv().await
    }

    async fn unsubscribe(self: Box<Self>) -> RelayResult<()> {
        let mut state = self.inner.state.lock().await;
        state.subscribers.retain(|s| s.id != self.id);
        Ok(())
    }
}

/// Redis风格的glob匹配，支持 `*`、`?` 和 `\` 转义
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some(b'\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(&c) if c != b'\\' && c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
