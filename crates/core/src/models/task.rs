use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// 任务生命周期状态
///
/// 状态只能单向流转，终止状态（COMPLETED / FAILED / CANCELLED）不可离开。
/// 重复应用当前状态视为幂等操作。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 检查状态转换是否合法
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            TaskStatus::Queued => true,
            TaskStatus::Running => next != TaskStatus::Queued,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(RelayError::Validation(format!("无效的任务状态: {other}"))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<TaskStatus>().map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 任务类型，决定执行哪个任务体
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Sample,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Sample => "sample",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sample" => Ok(TaskType::Sample),
            other => Err(RelayError::UnsupportedTaskType(other.to_string())),
        }
    }
}

/// 持久化的任务记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub cancelled_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// 新建任务请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreate {
    pub id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl TaskCreate {
    pub fn queued(id: impl Into<String>, task_type: TaskType, actor: Option<&str>) -> Self {
        Self {
            id: id.into(),
            task_type,
            status: TaskStatus::Queued,
            created_by: actor.map(str::to_string),
            updated_by: actor.map(str::to_string),
        }
    }
}

/// 任务更新请求，未设置的可选字段保持原值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub id: String,
    pub status: Option<TaskStatus>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn status(id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            status: Some(status),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn cancelled(id: impl Into<String>, actor: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: Some(TaskStatus::Cancelled),
            updated_by: actor.map(str::to_string),
            updated_at: Some(now),
            cancelled_by: actor.map(str::to_string),
            cancelled_at: Some(now),
        }
    }

    /// 将更新应用到已有任务上
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(updated_by) = &self.updated_by {
            task.updated_by = Some(updated_by.clone());
        }
        task.updated_at = self.updated_at.unwrap_or_else(Utc::now);
        if let Some(cancelled_by) = &self.cancelled_by {
            task.cancelled_by = Some(cancelled_by.clone());
        }
        if let Some(cancelled_at) = self.cancelled_at {
            task.cancelled_at = Some(cancelled_at);
        }
    }
}

/// 任务执行结果，与任务一对一且不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: String,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultCreate {
    pub task_id: String,
    pub result: serde_json::Value,
}

/// 对外暴露的任务状态视图
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusView {
    pub id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}
