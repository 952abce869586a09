//! 实时观察者广播
//!
//! 观察者注册在读写锁保护的表中。广播在读锁下对每个观察者做非阻塞发送，
//! 单个观察者发送失败只记录日志；已关闭的观察者在广播后统一移除。
//! 投递是尽力而为的，不重放历史事件。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

pub type ObserverId = u64;

/// 观察者关注的范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverScope {
    /// 全局事件流
    All,
    /// 单个任务的事件
    Task(String),
}

impl ObserverScope {
    fn accepts(&self, task_id: &str) -> bool {
        match self {
            ObserverScope::All => true,
            ObserverScope::Task(id) => id == task_id,
        }
    }
}

struct Observer {
    scope: ObserverScope,
    sender: mpsc::Sender<String>,
}

/// 新建立的观察者连接
pub struct ObserverConnection {
    pub id: ObserverId,
    pub receiver: mpsc::Receiver<String>,
}

pub struct ObserverHub {
    observers: RwLock<HashMap<ObserverId, Observer>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl ObserverHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// 注册观察者
    pub async fn connect(&self, scope: ObserverScope) -> ObserverConnection {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut observers = self.observers.write().await;
        observers.insert(id, Observer { scope, sender });
        info!("观察者 {} 已连接，当前观察者数: {}", id, observers.len());

        ObserverConnection { id, receiver }
    }

    /// 注销观察者，未知ID视为无操作
    pub async fn disconnect(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        let removed = observers.remove(&id).is_some();
        if removed {
            info!("观察者 {} 已断开，当前观察者数: {}", id, observers.len());
        }
        removed
    }

    /// 将观察者收窄到单个任务
    pub async fn subscribe_to_task(&self, id: ObserverId, task_id: &str) -> bool {
        let mut observers = self.observers.write().await;
        match observers.get_mut(&id) {
            Some(observer) => {
                observer.scope = ObserverScope::Task(task_id.to_string());
                debug!("观察者 {} 订阅任务 {}", id, task_id);
                true
            }
            None => false,
        }
    }

    /// 发送给所有观察者
    pub async fn broadcast_all(&self, payload: &str) -> usize {
        self.deliver(payload, |_| true).await
    }

    /// 发送给全局观察者以及订阅了该任务的观察者
    pub async fn publish_task_event(&self, task_id: &str, payload: &str) -> usize {
        self.deliver(payload, |scope| scope.accepts(task_id)).await
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// 关闭所有观察者连接
    pub async fn close_all(&self) {
        let mut observers = self.observers.write().await;
        let count = observers.len();
        observers.clear();
        info!("关闭 {} 个观察者连接", count);
    }

    async fn deliver<F>(&self, payload: &str, filter: F) -> usize
    where
        F: Fn(&ObserverScope) -> bool,
    {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let observers = self.observers.read().await;
            for (id, observer) in observers.iter() {
                if !filter(&observer.scope) {
                    continue;
                }
                match observer.sender.try_send(payload.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("观察者 {} 缓冲区已满，丢弃消息", id);
                        metrics::counter!("taskrelay_broadcast_dropped_total").increment(1);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("观察者 {} 连接已关闭", id);
                        closed.push(*id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut observers = self.observers.write().await;
            for id in closed {
                observers.remove(&id);
            }
        }

        metrics::counter!("taskrelay_broadcast_delivered_total").increment(delivered as u64);
        delivered
    }
}
