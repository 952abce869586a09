use async_trait::async_trait;
use sqlx::{PgPool, Row};
use taskrelay_core::models::{
    Task, TaskCreate, TaskResult, TaskResultCreate, TaskStatus, TaskType, TaskUpdate,
};
use taskrelay_core::traits::{TaskRepository, TaskResultRepository};
use taskrelay_core::{RelayError, RelayResult};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, status, task_type, created_by, updated_by, cancelled_by, \
                            created_at, updated_at, cancelled_at";

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> RelayResult<Task> {
        let task_type: String = row.try_get("task_type")?;
        Ok(Task {
            id: row.try_get("id")?,
            status: row.try_get::<TaskStatus, _>("status")?,
            task_type: task_type.parse::<TaskType>()?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
            cancelled_by: row.try_get("cancelled_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn add(&self, task: TaskCreate) -> RelayResult<Task> {
        let sql = format!(
            "INSERT INTO tasks (id, status, task_type, created_by, updated_by) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&task.id)
            .bind(task.status)
            .bind(task.task_type.as_str())
            .bind(&task.created_by)
            .bind(&task.updated_by)
            .fetch_one(&self.pool)
            .await?;

        debug!("创建任务记录: {}", task.id);
        Self::row_to_task(&row)
    }

    #[instrument(skip(self, update), fields(task_id = %update.id))]
    async fn update(&self, update: TaskUpdate) -> RelayResult<Task> {
        let sql = format!(
            "UPDATE tasks SET \
                status = COALESCE($2, status), \
                updated_by = COALESCE($3, updated_by), \
                updated_at = COALESCE($4, NOW()), \
                cancelled_by = COALESCE($5, cancelled_by), \
                cancelled_at = COALESCE($6, cancelled_at) \
             WHERE id = $1 RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&update.id)
            .bind(update.status)
            .bind(&update.updated_by)
            .bind(update.updated_at)
            .bind(&update.cancelled_by)
            .bind(update.cancelled_at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RelayError::TaskNotFound {
                id: update.id.clone(),
            })?;

        Self::row_to_task(&row)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> RelayResult<Task> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RelayError::TaskNotFound { id: id.to_string() })?;

        Self::row_to_task(&row)
    }
}

pub struct PostgresTaskResultRepository {
    pool: PgPool,
}

impl PostgresTaskResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_result(row: &sqlx::postgres::PgRow) -> RelayResult<TaskResult> {
        Ok(TaskResult {
            task_id: row.try_get("task_id")?,
            result: row.try_get("result")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TaskResultRepository for PostgresTaskResultRepository {
    #[instrument(skip(self, result), fields(task_id = %result.task_id))]
    async fn add(&self, result: TaskResultCreate) -> RelayResult<TaskResult> {
        let row = sqlx::query(
            "INSERT INTO task_results (task_id, result) VALUES ($1, $2) \
             ON CONFLICT (task_id) DO NOTHING \
             RETURNING task_id, result, created_at",
        )
        .bind(&result.task_id)
        .bind(&result.result)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RelayError::TaskResultAlreadyExists {
            task_id: result.task_id.clone(),
        })?;

        Self::row_to_result(&row)
    }

    #[instrument(skip(self))]
    async fn get(&self, task_id: &str) -> RelayResult<TaskResult> {
        let row = sqlx::query(
            "SELECT task_id, result, created_at FROM task_results WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RelayError::TaskResultNotFound {
            task_id: task_id.to_string(),
        })?;

        Self::row_to_result(&row)
    }
}
