pub mod broker;
pub mod repository;

pub use broker::*;
pub use repository::*;
