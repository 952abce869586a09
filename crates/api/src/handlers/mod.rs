pub mod health;
pub mod metrics;
pub mod monitoring;
pub mod tasks;
pub mod workers;
