pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use taskrelay_core::config::DatabaseConfig;
use taskrelay_core::traits::{TaskRepository, TaskResultRepository};
use taskrelay_core::{RelayError, RelayResult};
use tracing::info;

pub use memory::{InMemoryTaskRepository, InMemoryTaskResultRepository};
pub use postgres::{PostgresTaskRepository, PostgresTaskResultRepository};

/// 任务与结果仓储的组合
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub results: Arc<dyn TaskResultRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(InMemoryTaskRepository::new()),
            results: Arc::new(InMemoryTaskResultRepository::new()),
        }
    }

    /// 根据数据库URL创建仓储，必要时执行迁移
    pub async fn connect(config: &DatabaseConfig) -> RelayResult<Self> {
        if config.is_memory() {
            info!("使用内存存储");
            return Ok(Self::in_memory());
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        if config.run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| RelayError::DatabaseOperation(format!("数据库迁移失败: {e}")))?;
            info!("数据库迁移完成");
        }

        Ok(Self {
            tasks: Arc::new(PostgresTaskRepository::new(pool.clone())),
            results: Arc::new(PostgresTaskResultRepository::new(pool)),
        })
    }
}
