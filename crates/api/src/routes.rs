use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use taskrelay_core::config::AuthConfig;
use taskrelay_dispatcher::{ObserverHub, TaskDispatcher, WorkerRegistry};

use crate::auth::Authenticator;
use crate::handlers::{
    health::health_check,
    metrics::render_metrics,
    monitoring::{task_monitor, task_monitor_for},
    tasks::{cancel_task, create_task, get_task},
    workers::{list_workers, next_worker, register_worker},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<TaskDispatcher>,
    pub workers: Arc<WorkerRegistry>,
    pub hub: Arc<ObserverHub>,
    pub auth: Arc<Authenticator>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        workers: Arc<WorkerRegistry>,
        hub: Arc<ObserverHub>,
        auth: &AuthConfig,
    ) -> Self {
        Self {
            dispatcher,
            workers,
            hub,
            auth: Arc::new(Authenticator::new(auth)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// 创建API路由
pub fn create_routes(state: AppState, metrics_endpoint: &str) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 任务
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/{id}", get(get_task).delete(cancel_task))
        // Worker轮询
        .route("/api/workers", get(list_workers))
        .route("/api/workers/register", post(register_worker))
        .route("/api/workers/next", get(next_worker))
        // 实时状态推送
        .route("/monitoring/task_monitor", get(task_monitor))
        .route("/monitoring/task_monitor/{task_id}", get(task_monitor_for))
        .route(metrics_endpoint, get(render_metrics))
        .with_state(state)
}
