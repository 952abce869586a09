use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskrelay_core::models::{TaskStatus, TaskType};
use taskrelay_worker::CancelOutcome;

use crate::{
    auth::CurrentActor,
    error::{ApiError, ApiResult},
    response::{acknowledged, created, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateTaskQuery {
    pub task_type: String,
}

/// 入队后的任务摘要
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskCreatedResponse {
    pub id: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
}

/// 提交任务，请求体（可选）为任务参数
pub async fn create_task(
    State(state): State<AppState>,
    Query(query): Query<CreateTaskQuery>,
    actor: CurrentActor,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let task_type: TaskType = query.task_type.parse()?;
    let args = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("任务参数不是有效的JSON: {e}")))?
    };

    let task = state
        .dispatcher
        .enqueue(task_type, args, actor.as_deref())
        .await?;

    Ok(created(TaskCreatedResponse {
        id: task.id,
        status: task.status,
        task_type: task.task_type,
    }))
}

/// 查询任务状态
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let view = state.dispatcher.cached_status(&id).await?;
    Ok(success(view))
}

/// 取消任务
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    actor: CurrentActor,
) -> ApiResult<impl IntoResponse> {
    match state.dispatcher.cancel(&id, actor.as_deref()).await? {
        CancelOutcome::Cancelled { .. } => Ok(acknowledged(format!("任务 {id} 已取消"))),
        CancelOutcome::AlreadyTerminal(job_state) => Err(ApiError::Conflict(format!(
            "任务 {id} 已处于终止状态: {}",
            job_state.task_status()
        ))),
        CancelOutcome::NotFound => Err(ApiError::NotFound(format!("任务 {id} 不存在"))),
    }
}
