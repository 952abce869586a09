//! 配置管理
//!
//! 配置按 TOML 文件 → 环境变量（前缀 `TASKRELAY`，分隔符 `__`）的顺序叠加，
//! 未给出的字段使用各配置段的默认值，加载后统一校验。

pub mod models;

pub use models::*;
