//! Redis backed broker

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{Client, FromRedisValue, Script};
use taskrelay_core::config::BrokerConfig;
use taskrelay_core::traits::{is_pattern, Broker, BrokerMessage, Subscription};
use taskrelay_core::{RelayError, RelayResult};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// 值匹配时才删除键
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis broker sharing one multiplexed connection for commands.
///
/// Every subscription opens its own pub/sub connection, released by
/// [`Subscription::unsubscribe`].
pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
    command_timeout: Duration,
    compare_and_delete: Script,
}

impl RedisBroker {
    /// Connect and verify the server answers PING
    pub async fn connect(config: &BrokerConfig) -> RelayResult<Self> {
        let client = Client::open(config.redis.build_url())
            .map_err(|e| RelayError::Broker(format!("Failed to create Redis client: {e}")))?;

        let connect_timeout = Duration::from_secs(config.redis.connection_timeout_seconds);
        let conn = timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| RelayError::BrokerTimeout {
                operation: "CONNECT".to_string(),
            })?
            .map_err(|e| RelayError::Broker(format!("Failed to connect to Redis: {e}")))?;

        let broker = Self {
            client,
            conn,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
        };
        broker.ping().await?;

        info!(
            "Connected to Redis at {}:{}",
            config.redis.host, config.redis.port
        );
        Ok(broker)
    }

    async fn query<T: FromRedisValue>(&self, operation: &str, cmd: redis::Cmd) -> RelayResult<T> {
        let mut conn = self.conn.clone();
        match timeout(self.command_timeout, cmd.query_async::<T>(&mut conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RelayError::Broker(format!("{operation} failed: {e}"))),
            Err(_) => Err(RelayError::BrokerTimeout {
                operation: operation.to_string(),
            }),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl Broker for RedisBroker {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> RelayResult<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("GET", cmd).await
    }

    #[instrument(skip(self, value))]
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> RelayResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_millis(ttl));
        self.query::<()>("SET", cmd).await
    }

    #[instrument(skip(self, value))]
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> RelayResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl));
        let reply: Option<String> = self.query("SET NX", cmd).await?;
        Ok(reply.is_some())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> RelayResult<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: u64 = self.query("DEL", cmd).await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self, expected))]
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> RelayResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = self.compare_and_delete.key(key);
        invocation.arg(expected);

        match timeout(
            self.command_timeout,
            invocation.invoke_async::<u64>(&mut conn),
        )
        .await
        {
            Ok(Ok(removed)) => Ok(removed > 0),
            Ok(Err(e)) => Err(RelayError::Broker(format!("EVALSHA failed: {e}"))),
            Err(_) => Err(RelayError::BrokerTimeout {
                operation: "EVALSHA".to_string(),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn rpush(&self, key: &str, value: &str) -> RelayResult<u64> {
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(key).arg(value);
        self.query("RPUSH", cmd).await
    }

    #[instrument(skip(self))]
    async fn rotate_left_to_right(&self, key: &str) -> RelayResult<Option<String>> {
        let mut cmd = redis::cmd("LMOVE");
        cmd.arg(key).arg(key).arg("LEFT").arg("RIGHT");
        self.query("LMOVE", cmd).await
    }

    #[instrument(skip(self))]
    async fn list_range(&self, key: &str) -> RelayResult<Vec<String>> {
        let mut cmd = redis::cmd("LRANGE");
        cmd.arg(key).arg(0).arg(-1);
        self.query("LRANGE", cmd).await
    }

    #[instrument(skip(self, payload))]
    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<u64> {
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(payload);
        self.query("PUBLISH", cmd).await
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, channel_or_pattern: &str) -> RelayResult<Box<dyn Subscription>> {
        let mut pubsub = timeout(self.command_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| RelayError::BrokerTimeout {
                operation: "SUBSCRIBE".to_string(),
            })?
            .map_err(|e| RelayError::Broker(format!("Failed to open pub/sub connection: {e}")))?;

        let pattern = is_pattern(channel_or_pattern);
        let subscribed = if pattern {
            pubsub.psubscribe(channel_or_pattern).await
        } else {
            pubsub.subscribe(channel_or_pattern).await
        };
        subscribed.map_err(|e| RelayError::Broker(format!("SUBSCRIBE failed: {e}")))?;

        debug!("Subscribed to {}", channel_or_pattern);
        Ok(Box::new(RedisSubscription {
            pubsub,
            target: channel_or_pattern.to_string(),
            pattern,
        }))
    }

    async fn ping(&self) -> RelayResult<()> {
        let reply: String = self.query("PING", redis::cmd("PING")).await?;
        if reply != "PONG" {
            return Err(RelayError::Broker(format!(
                "Unexpected PING response: {reply}"
            )));
        }
        Ok(())
    }
}

struct RedisSubscription {
    pubsub: PubSub,
    target: String,
    pattern: bool,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Option<BrokerMessage> {
        let mut stream = std::pin::pin!(self.pubsub.on_message());
        loop {
            let msg = stream.next().await?;
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    return Some(BrokerMessage {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    })
                }
                Err(e) => warn!(
                    "Dropping non-text message on {}: {}",
                    msg.get_channel_name(),
                    e
                ),
            }
        }
    }

    async fn unsubscribe(mut self: Box<Self>) -> RelayResult<()> {
        let result = if self.pattern {
            self.pubsub.punsubscribe(&self.target).await
        } else {
            self.pubsub.unsubscribe(&self.target).await
        };
        result.map_err(|e| RelayError::Broker(format!("UNSUBSCRIBE failed: {e}")))?;
        debug!("Unsubscribed from {}", self.target);
        Ok(())
    }
}
