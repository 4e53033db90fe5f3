// 传输模块类型定义

use crate::transfer::chunk::{chunk_count, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNK_COUNT};
use crate::transfer::progress::{NoopProgress, ProgressReporter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// 一次传输的请求参数（传输期间不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub bucket_key: String,
    pub object_key: String,
    /// 对象总大小
    pub total_size: u64,
    /// 分片大小
    pub chunk_size: u64,
    pub direction: Direction,
}

impl TransferRequest {
    pub fn new(
        bucket_key: impl Into<String>,
        object_key: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        direction: Direction,
    ) -> Self {
        Self {
            bucket_key: bucket_key.into(),
            object_key: object_key.into(),
            total_size,
            chunk_size,
            direction,
        }
    }

    /// 分片数量
    pub fn total_chunks(&self) -> u64 {
        chunk_count(self.total_size, self.chunk_size)
    }
}

/// 传输参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 允许的最大分片数（预检）
    pub max_chunk_count: u64,
    /// 每次请求上传链接的数量上限
    pub url_batch_size: u64,
    /// 单个分片的最大尝试次数（包含首次）
    pub max_retry_per_chunk: u32,
    /// 单个分片因链接过期（403）而刷新链接的最大次数
    pub max_retry_on_url_expiry: u32,
    /// 单次接口调用因令牌过期而刷新令牌的最大次数
    pub max_retry_on_token_expiry: u32,
    /// 上传最大并发分片数（1 表示严格顺序）
    pub max_concurrent_chunks: usize,
    /// 初始退避延迟（毫秒）
    pub initial_backoff_ms: u64,
    /// 最大退避延迟（毫秒）
    pub max_backoff_ms: u64,
    /// 签名链接有效期（分钟），None 使用服务端默认值
    pub url_expiry_minutes: Option<u32>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_count: DEFAULT_MAX_CHUNK_COUNT,
            url_batch_size: 25,
            max_retry_per_chunk: 5,
            max_retry_on_url_expiry: 3,
            max_retry_on_token_expiry: 3,
            max_concurrent_chunks: 1,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            url_expiry_minutes: None,
        }
    }
}

/// 传输状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Planning,
    AcquiringUrls,
    TransferringChunk,
    RefreshingUrls,
    RefreshingCredential,
    Finalizing,
    Complete,
    Failed,
}

impl TransferPhase {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Complete | TransferPhase::Failed)
    }
}

/// 单个分片的尝试计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkAttempts {
    /// 普通失败次数（HTTP 错误或网络错误）
    pub failures: u32,
    /// 因链接过期刷新链接的次数
    pub url_refreshes: u32,
}

/// 单次传输的运行状态（不持久化，传输结束即丢弃）
///
/// 阶段变化会通知给 `observer`
pub struct TransferState {
    phase: Mutex<TransferPhase>,
    chunks_completed: AtomicU64,
    total_chunks: AtomicU64,
    observer: Arc<dyn ProgressReporter>,
}

impl TransferState {
    pub fn new(total_chunks: u64) -> Self {
        Self::with_observer(total_chunks, Arc::new(NoopProgress))
    }

    pub fn with_observer(total_chunks: u64, observer: Arc<dyn ProgressReporter>) -> Self {
        Self {
            phase: Mutex::new(TransferPhase::Planning),
            chunks_completed: AtomicU64::new(0),
            total_chunks: AtomicU64::new(total_chunks),
            observer,
        }
    }

    /// 当前阶段
    pub fn phase(&self) -> TransferPhase {
        *self.phase.lock()
    }

    /// 切换阶段（终止状态不再变化）
    pub fn enter(&self, next: TransferPhase) {
        let mut phase = self.phase.lock();
        if phase.is_terminal() || *phase == next {
            return;
        }
        debug!("传输阶段: {:?} -> {:?}", *phase, next);
        *phase = next;
        // 持锁通知，接收方看到的阶段顺序与实际一致
        self.observer.phase_changed(next);
    }

    /// 记录一个分片完成，返回已完成数量
    pub fn complete_chunk(&self) -> u64 {
        self.chunks_completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn chunks_completed(&self) -> u64 {
        self.chunks_completed.load(Ordering::SeqCst)
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks.load(Ordering::SeqCst)
    }

    /// 下载时在拿到对象大小后才能确定分片数
    pub fn set_total_chunks(&self, total_chunks: u64) {
        self.total_chunks.store(total_chunks, Ordering::SeqCst);
    }
}
