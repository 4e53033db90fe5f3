//! 刷新协调器
//!
//! 多个分片任务可能同时发现令牌或链接失效，协调器保证同一时刻只有一个刷新在执行，
//! 且同一代数据只刷新一次：其余任务等待并直接复用刷新结果。

use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// 带代数的值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// 代数，每次刷新加一
    pub generation: u64,
    pub value: T,
}

/// 刷新协调器
///
/// 核心功能：
/// 1. 刷新串行化，不会有两个刷新同时进行
/// 2. 基于代数去重：调用者带上自己看到的代数，若已被其他任务刷新则直接返回新值
#[derive(Debug)]
pub struct RefreshCoordinator<T> {
    /// 当前值
    current: RwLock<Versioned<T>>,
    /// 刷新锁
    refresh_lock: Mutex<()>,
    /// 实际执行的刷新次数
    refresh_count: AtomicU64,
}

impl<T: Clone> RefreshCoordinator<T> {
    /// 创建新的刷新协调器（代数从 0 开始）
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Versioned {
                generation: 0,
                value,
            }),
            refresh_lock: Mutex::new(()),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// 获取当前值
    pub fn current(&self) -> Versioned<T> {
        self.current.read().clone()
    }

    /// 实际执行过的刷新次数
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// 若当前代数仍为 `seen`，执行 `refresh` 并替换值；否则直接返回更新的值
    ///
    /// # 返回
    /// - `Ok(Versioned)`: 刷新后的值（可能由其他任务刷新）
    /// - `Err(E)`: 本次刷新失败，当前值保持不变
    pub async fn refresh_if_stale<F, Fut, E>(&self, seen: u64, refresh: F) -> Result<Versioned<T>, E>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _guard = self.refresh_lock.lock().await;

        let current = self.current();
        if current.generation != seen {
            // 已被其他任务刷新
            return Ok(current);
        }

        let value = refresh(current.value).await?;

        let mut slot = self.current.write();
        slot.generation += 1;
        slot.value = value;
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        Ok(slot.clone())
    }
}
