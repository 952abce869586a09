use thiserror::Error;

/// 任务中继系统错误类型定义
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("不支持的任务类型: {0}")]
    UnsupportedTaskType(String),

    #[error("请求参数无效: {0}")]
    Validation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务结果未找到: {task_id}")]
    TaskResultNotFound { task_id: String },

    #[error("任务结果已存在: {task_id}")]
    TaskResultAlreadyExists { task_id: String },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("Broker错误: {0}")]
    Broker(String),

    #[error("Broker操作超时: {operation}")]
    BrokerTimeout { operation: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务已被取消: {id}")]
    TaskCancelled { id: String },

    #[error("任务队列已关闭")]
    QueueClosed,

    #[error("状态广播管道已在运行")]
    PipelineAlreadyRunning,

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RelayError {
    /// 是否为可重试的基础设施故障
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::Broker(_)
                | RelayError::BrokerTimeout { .. }
                | RelayError::Database(_)
                | RelayError::DatabaseOperation(_)
        )
    }

    /// 是否为资源不存在类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RelayError::TaskNotFound { .. } | RelayError::TaskResultNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type RelayResult<T> = std::result::Result<T, RelayError>;
