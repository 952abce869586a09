use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use taskrelay_api::{create_app, AppState};
use taskrelay_core::config::AppConfig;
use taskrelay_core::models::StatusChannels;
use taskrelay_core::traits::Broker;
use taskrelay_dispatcher::{ObserverHub, StatusPipeline, TaskDispatcher, WorkerRegistry};
use taskrelay_infrastructure::{create_broker, LockManager, ReadThroughCache, Repositories};
use taskrelay_worker::{LocalQueue, StatusPublisher, TaskRegistry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::shutdown::ShutdownManager;

const MIGRATION_LOCK: &str = "database_migrations";

/// 进程级组件集合，启动时构建一次，显式传给各个使用方
#[derive(Clone)]
pub struct AppContext {
    pub broker: Arc<dyn Broker>,
    pub repositories: Repositories,
    pub locks: Arc<LockManager>,
    pub cache: Arc<ReadThroughCache>,
    pub hub: Arc<ObserverHub>,
    pub queue: LocalQueue,
    pub dispatcher: Arc<TaskDispatcher>,
    pub workers: Arc<WorkerRegistry>,
    pub pipeline: Arc<StatusPipeline>,
}

impl AppContext {
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let broker = create_broker(&config.broker)
            .await
            .context("连接Broker失败")?;
        let locks = Arc::new(LockManager::new(Arc::clone(&broker), &config.lock));

        // 多个实例同时启动时只让一个执行迁移
        let repositories = locks
            .with_lock(MIGRATION_LOCK, locks.default_options(), |acquired| async move {
                if !acquired {
                    warn!("未获取到迁移锁，直接连接数据库");
                }
                Repositories::connect(&config.database).await
            })
            .await
            .context("初始化数据库失败")?;

        let channels = StatusChannels::new(config.status.channel_prefix.clone());
        let hub = Arc::new(ObserverHub::new(config.status.observer_buffer));
        let cache = Arc::new(ReadThroughCache::new(Arc::clone(&broker), &config.cache));
        let publisher = StatusPublisher::new(Arc::clone(&broker), channels.clone());

        let registry = Arc::new(TaskRegistry::with_builtin_tasks(
            publisher.clone(),
            Duration::from_secs(config.queue.sample_task_seconds),
        ));
        let queue = LocalQueue::new(&config.queue);

        let dispatcher = Arc::new(
            TaskDispatcher::new(
                registry,
                Arc::new(queue.clone()),
                repositories.clone(),
                publisher,
            )
            .with_cache(
                Arc::clone(&cache),
                Duration::from_secs(config.cache.task_status_ttl_seconds),
            ),
        );
        let workers = Arc::new(WorkerRegistry::new(
            Arc::clone(&broker),
            config.workers.list_key.clone(),
        ));
        let pipeline = Arc::new(
            StatusPipeline::new(
                Arc::clone(&broker),
                repositories.clone(),
                Arc::clone(&hub),
                channels,
            )
            .with_cache(Arc::clone(&cache))
            .with_resubscribe_delay(Duration::from_millis(config.status.resubscribe_delay_ms)),
        );

        Ok(Self {
            broker,
            repositories,
            locks,
            cache,
            hub,
            queue,
            dispatcher,
            workers,
            pipeline,
        })
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    context: AppContext,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");
        let context = AppContext::build(&config).await?;
        Ok(Self {
            config,
            context,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// 运行直到收到关闭信号，然后按顺序停止各组件
    pub async fn run(self, shutdown: ShutdownManager) -> Result<()> {
        let context = self.context;

        // 管道使用独立令牌，队列排空后才停止，关闭期间产生的终止事件仍会被持久化
        let pipeline = context
            .pipeline
            .start(CancellationToken::new())
            .await
            .context("启动状态扇出管道失败")?;

        let mut state = AppState::new(
            Arc::clone(&context.dispatcher),
            Arc::clone(&context.workers),
            Arc::clone(&context.hub),
            &self.config.api.auth,
        );
        if let Some(handle) = self.metrics {
            state = state.with_metrics(handle);
        }
        let router = create_app(state, &self.config.api, &self.config.observability);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定API地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器监听: {}", self.config.api.bind_address);

        let token = shutdown.token();
        let hub = Arc::clone(&context.hub);
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                token.cancelled().await;
                hub.close_all().await;
            })
            .await
            .context("API服务器运行失败");

        context
            .dispatcher
            .shutdown(Duration::from_secs(self.config.queue.shutdown_timeout_seconds))
            .await;
        info!("停止状态扇出管道");
        pipeline.shutdown().await;
        context.hub.close_all().await;

        served?;
        info!("应用已优雅关闭");
        Ok(())
    }
}
