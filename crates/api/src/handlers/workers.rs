use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    response::{acknowledged, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct RegisterWorkerRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: String,
}

/// 注册Worker，重复注册会增加其轮询权重
pub async fn register_worker(
    State(state): State<AppState>,
    Json(request): Json<RegisterWorkerRequest>,
) -> ApiResult<impl IntoResponse> {
    state.workers.register(&request.id).await?;
    Ok(acknowledged(format!("Worker {} 注册成功", request.id)))
}

/// 轮询选择下一个Worker
pub async fn next_worker(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    match state.workers.next_worker().await? {
        Some(id) => Ok(success(WorkerResponse { id })),
        None => Err(ApiError::ServiceUnavailable(
            "没有可用的Worker".to_string(),
        )),
    }
}

/// 当前轮询列表
pub async fn list_workers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let workers = state.workers.workers().await?;
    Ok(success(workers))
}
