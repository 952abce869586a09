pub mod api_observability;
pub mod app_config;
pub mod broker;
pub mod database;
pub mod runtime;

// Re-export main types for easier imports
pub use api_observability::{ApiConfig, AuthConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use broker::{BrokerConfig, BrokerKind, RedisConfig};
pub use database::{DatabaseConfig, MEMORY_DATABASE_URL};
pub use runtime::{CacheConfig, LockConfig, QueueConfig, StatusConfig, WorkerRegistryConfig};
