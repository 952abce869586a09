use serde::{Deserialize, Serialize};

use super::task::TaskStatus;
use crate::errors::{RelayError, RelayResult};

/// 任务状态变更事件，经Broker发布到 `<prefix>_<task_id>` 频道
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl StatusEvent {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            result: None,
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn to_payload(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 解析并校验事件载荷
    ///
    /// 非法JSON、缺失或为空的 `task_id`、缺失或未知的 `status` 都视为格式错误。
    pub fn parse(payload: &str) -> RelayResult<Self> {
        let value: serde_json::Value = serde_json::from_str(payload)?;

        let task_id = value
            .get("task_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| RelayError::Validation("状态事件缺少 task_id".to_string()))?;

        let status = value
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayError::Validation("状态事件缺少 status".to_string()))?
            .parse::<TaskStatus>()?;

        let result = match value.get("result") {
            None | Some(serde_json::Value::Null) => None,
            Some(other) => Some(other.clone()),
        };

        Ok(Self {
            task_id: task_id.to_string(),
            status,
            result,
        })
    }
}

/// 状态频道命名规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChannels {
    prefix: String,
}

impl StatusChannels {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn channel_for(&self, task_id: &str) -> String {
        format!("{}_{}", self.prefix, task_id)
    }

    /// 覆盖所有任务频道的订阅模式
    pub fn pattern(&self) -> String {
        format!("{}_*", self.prefix)
    }
}

impl Default for StatusChannels {
    fn default() -> Self {
        Self::new("task_updates")
    }
}
