//! # taskrelay-api
//!
//! 基于Axum的HTTP与WebSocket接口。
//!
//! ## API 端点
//!
//! - `GET /health` - 健康检查
//! - `POST /api/tasks?task_type=sample` - 提交任务，请求体为任务参数
//! - `GET /api/tasks/{id}` - 查询任务状态
//! - `DELETE /api/tasks/{id}` - 取消任务
//! - `POST /api/workers/register` - 注册Worker
//! - `GET /api/workers/next` - 轮询选择Worker
//! - `GET /api/workers` - 当前轮询列表
//! - `GET /monitoring/task_monitor[/{task_id}]` - WebSocket状态推送
//! - `GET /metrics` - Prometheus指标
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": {"id": "…", "status": "queued", "task_type": "sample"},
//!   "message": null,
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! 错误统一为 `{"error": {"message", "type", "code", "timestamp"}}`。

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::create_routes;
use taskrelay_core::config::{ApiConfig, ObservabilityConfig};

pub use routes::AppState;

/// 创建完整的API应用
pub fn create_app(state: AppState, api: &ApiConfig, observability: &ObservabilityConfig) -> Router {
    let router = create_routes(state, &observability.metrics_endpoint).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api.cors_enabled {
        router.layer(cors_layer(api))
    } else {
        router
    }
}
