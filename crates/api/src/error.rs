use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use taskrelay_core::RelayError;
use tracing::error;

use crate::auth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Relay(#[from] RelayError),

    #[error("认证错误: {0}")]
    Authentication(#[from] AuthError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源: {0}")]
    NotFound(String),

    #[error("请求冲突: {0}")]
    Conflict(String),

    #[error("服务暂不可用: {0}")]
    ServiceUnavailable(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Relay(err) => match err {
                RelayError::UnsupportedTaskType(_) => {
                    (StatusCode::BAD_REQUEST, "UNSUPPORTED_TASK_TYPE")
                }
                RelayError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                RelayError::TaskNotFound { .. } => (StatusCode::NOT_FOUND, "TASK_NOT_FOUND"),
                RelayError::TaskResultNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "TASK_RESULT_NOT_FOUND")
                }
                RelayError::TaskResultAlreadyExists { .. } => {
                    (StatusCode::CONFLICT, "TASK_RESULT_EXISTS")
                }
                RelayError::QueueClosed => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_CLOSED"),
                e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "INFRASTRUCTURE_ERROR"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::Authentication(_) => (StatusCode::UNAUTHORIZED, "AUTHENTICATION_ERROR"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
