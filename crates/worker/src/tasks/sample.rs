use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use taskrelay_core::{RelayError, RelayResult};
use tracing::debug;

use crate::executor::{TaskContext, TaskExecutor};

#[derive(Debug, Deserialize)]
struct SampleArgs {
    seconds: Option<u64>,
}

/// 示例任务：等待指定秒数后返回一个随机数
pub struct SampleTask {
    default_duration: Duration,
}

impl SampleTask {
    pub fn new(default_duration: Duration) -> Self {
        Self { default_duration }
    }

    fn duration_for(&self, args: &Value) -> RelayResult<Duration> {
        if args.is_null() {
            return Ok(self.default_duration);
        }
        let parsed: SampleArgs = serde_json::from_value(args.clone())
            .map_err(|e| RelayError::TaskExecution(format!("invalid sample arguments: {e}")))?;
        Ok(parsed
            .seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_duration))
    }
}

#[async_trait]
impl TaskExecutor for SampleTask {
    fn name(&self) -> &str {
        "sample"
    }

    async fn execute(&self, context: &TaskContext) -> RelayResult<Value> {
        let duration = self.duration_for(&context.args)?;
        debug!("示例任务 {} 将运行 {:?}", context.task_id, duration);

        tokio::time::sleep(duration).await;

        let value: u32 = rand::rng().random_range(0..=100);
        Ok(json!({
            "result": value,
            "message": format!(
                "Task completed successfully after {} seconds",
                duration.as_secs()
            ),
        }))
    }
}
