//! 公共模块
//!
//! 提供跨模块使用的通用组件

mod refresh_coordinator;
mod retry;

pub use refresh_coordinator::{RefreshCoordinator, Versioned};
pub use retry::{calculate_backoff_delay, sleep_or_cancel};
