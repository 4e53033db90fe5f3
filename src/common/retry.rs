// 重试退避

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 计算指数退避延迟（毫秒）
///
/// # 延迟序列（initial=100, max=5000）
/// - retry_count=0: 100ms
/// - retry_count=1: 200ms
/// - retry_count=2: 400ms
/// - 最大: 5000ms
pub fn calculate_backoff_delay(retry_count: u32, initial_ms: u64, max_ms: u64) -> u64 {
    let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    initial_ms.saturating_mul(factor).min(max_ms)
}

/// 等待退避时间，期间可被取消
///
/// # 返回
/// - `true`: 正常等待结束
/// - `false`: 等待期间收到取消信号
pub async fn sleep_or_cancel(delay_ms: u64, cancel: &CancellationToken) -> bool {
    if delay_ms == 0 {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
