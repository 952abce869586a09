use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use taskrelay_core::models::TaskType;
use tracing::info;

use crate::executor::{StatusPublishingExecutor, TaskExecutor};
use crate::status::StatusPublisher;
use crate::tasks::SampleTask;

/// 任务类型到执行体的映射
#[derive(Default)]
pub struct TaskRegistry {
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置任务，每个执行体都包装状态发布
    pub fn with_builtin_tasks(publisher: StatusPublisher, sample_duration: Duration) -> Self {
        let mut registry = Self::new();
        registry.register_published(
            TaskType::Sample,
            Arc::new(SampleTask::new(sample_duration)),
            publisher,
        );
        registry
    }

    /// 直接注册执行体
    pub fn register(&mut self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) {
        info!("注册任务执行体: {} -> {}", task_type, executor.name());
        self.executors.insert(task_type, executor);
    }

    /// 注册执行体并包装状态发布
    pub fn register_published(
        &mut self,
        task_type: TaskType,
        executor: Arc<dyn TaskExecutor>,
        publisher: StatusPublisher,
    ) {
        self.register(
            task_type,
            Arc::new(StatusPublishingExecutor::new(executor, publisher)),
        );
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&task_type).cloned()
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.executors.contains_key(&task_type)
    }
}
