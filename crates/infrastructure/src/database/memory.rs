use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use taskrelay_core::models::{Task, TaskCreate, TaskResult, TaskResultCreate, TaskUpdate};
use taskrelay_core::traits::{TaskRepository, TaskResultRepository};
use taskrelay_core::{RelayError, RelayResult};
use tokio::sync::RwLock;

/// 内存任务仓储
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn add(&self, task: TaskCreate) -> RelayResult<Task> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(RelayError::DatabaseOperation(format!(
                "任务已存在: {}",
                task.id
            )));
        }

        let now = Utc::now();
        let record = Task {
            id: task.id.clone(),
            status: task.status,
            task_type: task.task_type,
            created_by: task.created_by,
            updated_by: task.updated_by,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        };
        tasks.insert(task.id, record.clone());
        Ok(record)
    }

    async fn update(&self, update: TaskUpdate) -> RelayResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&update.id)
            .ok_or_else(|| RelayError::TaskNotFound {
                id: update.id.clone(),
            })?;
        update.apply_to(task);
        Ok(task.clone())
    }

    async fn get(&self, id: &str) -> RelayResult<Task> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::TaskNotFound { id: id.to_string() })
    }
}

/// 内存任务结果仓储
#[derive(Default)]
pub struct InMemoryTaskResultRepository {
    results: RwLock<HashMap<String, TaskResult>>,
}

impl InMemoryTaskResultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskResultRepository for InMemoryTaskResultRepository {
    async fn add(&self, result: TaskResultCreate) -> RelayResult<TaskResult> {
        let mut results = self.results.write().await;
        if results.contains_key(&result.task_id) {
            return Err(RelayError::TaskResultAlreadyExists {
                task_id: result.task_id,
            });
        }
        let record = TaskResult {
            task_id: result.task_id.clone(),
            result: result.result,
            created_at: Utc::now(),
        };
        results.insert(result.task_id, record.clone());
        Ok(record)
    }

    async fn get(&self, task_id: &str) -> RelayResult<TaskResult> {
        self.results
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| RelayError::TaskResultNotFound {
                task_id: task_id.to_string(),
            })
    }
}
