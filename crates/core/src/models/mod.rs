//! # 数据模型
//!
//! 任务、任务结果与状态事件的核心数据结构。
//!
//! ## 任务状态流转
//! ```text
//! QUEUED → RUNNING → COMPLETED
//!    ↓        ↓   ↘
//!    ↓        ↓     FAILED
//!    └──→ CANCELLED ←┘
//! ```
//!
//! 状态事件 [`StatusEvent`] 是任务与结果变更的传输编码，发布在
//! [`StatusChannels`] 约定的频道上。

pub mod status_event;
pub mod task;

pub use status_event::*;
pub use task::*;
