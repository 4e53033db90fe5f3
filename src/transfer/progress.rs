//! 进度上报
//!
//! 百分比只增不减：并发分片乱序完成时，较小的百分比会被丢弃。

use crate::transfer::types::TransferPhase;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// 传输开始时上报的百分比
pub const START_PERCENT: u8 = 1;

/// 传输完成时上报的百分比
pub const COMPLETE_PERCENT: u8 = 100;

/// 进度接收方
pub trait ProgressReporter: Send + Sync {
    /// 上报完成百分比（0-100）
    fn report(&self, percent: u8);

    /// 传输阶段变化
    fn phase_changed(&self, _phase: TransferPhase) {}
}

/// 不上报进度
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _percent: u8) {}
}

/// 以日志形式输出进度
#[derive(Debug, Clone)]
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressReporter for LogProgress {
    fn report(&self, percent: u8) {
        info!("[{}] 进度: {}%", self.label, percent);
    }

    fn phase_changed(&self, phase: TransferPhase) {
        debug!("[{}] 阶段: {:?}", self.label, phase);
    }
}

/// 单调进度包装
///
/// 只有当百分比严格大于上次上报值时才转发
pub struct MonotonicProgress {
    inner: Arc<dyn ProgressReporter>,
    last: Mutex<u8>,
}

impl MonotonicProgress {
    pub fn new(inner: Arc<dyn ProgressReporter>) -> Self {
        Self {
            inner,
            last: Mutex::new(0),
        }
    }

    /// 上次上报的百分比
    pub fn last(&self) -> u8 {
        *self.last.lock()
    }
}

impl ProgressReporter for MonotonicProgress {
    fn report(&self, percent: u8) {
        let percent = percent.min(COMPLETE_PERCENT);
        // 持锁转发，保证接收方看到的顺序同样单调
        let mut last = self.last.lock();
        if percent > *last {
            *last = percent;
            self.inner.report(percent);
        }
    }
}

/// 分片完成时的百分比
///
/// `round(completed / total * 100)`，限制在 [1, 99]：100 只在整个传输成功后上报
pub fn chunk_percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return START_PERCENT;
    }
    let completed = completed.min(total) as u128;
    let total = total as u128;
    let rounded = (completed * 200 + total) / (total * 2);
    rounded.clamp(START_PERCENT as u128, (COMPLETE_PERCENT - 1) as u128) as u8
}
