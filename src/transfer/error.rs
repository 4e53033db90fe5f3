// 传输错误类型

use crate::oss::provider::ProviderError;

/// 传输失败原因
///
/// 可重试的情况（链接过期、令牌过期、单次传输失败）都在引擎内部按预算处理，
/// 只有预算耗尽或不可重试时才会以此类型返回给调用者。
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// 大小参数非法（预检，不重试）
    #[error("无效的大小: {0}")]
    InvalidSize(String),

    /// 分片数超过上限（预检，不重试）
    #[error("分片数 {chunks} 超过上限 {max}")]
    TooLarge { chunks: u64, max: u64 },

    /// 访问令牌无法在预算内刷新
    #[error("访问令牌刷新失败（已刷新 {attempts} 次）: {last}")]
    CredentialRefreshExhausted { attempts: u32, last: String },

    /// 签名链接无法在预算内刷新
    #[error("分片 #{chunk_index} 的签名链接刷新 {attempts} 次后仍过期")]
    UrlExpiredExhausted { chunk_index: u64, attempts: u32 },

    /// 分片传输在重试预算内始终失败
    #[error("分片 #{chunk_index} 传输失败（尝试 {attempts} 次）: status={status:?}, body={body}")]
    ChunkTransfer {
        chunk_index: u64,
        /// 最后一次响应的状态码（网络错误时为 None）
        status: Option<u16>,
        /// 最后一次响应体或错误信息
        body: String,
        attempts: u32,
    },

    /// 下载过程中对象大小发生变化（已发出过请求）
    #[error("对象在下载过程中发生变化: 大小 {expected} -> {actual}")]
    ObjectChanged { expected: u64, actual: u64 },

    /// 服务端尚未完成合并，不能下载
    #[error("对象尚未就绪: {bucket_key}/{object_key}")]
    ObjectNotReady {
        bucket_key: String,
        object_key: String,
    },

    /// 收到取消信号
    #[error("传输已取消")]
    Cancelled,

    /// 上传合并失败
    #[error("上传合并失败: status={status:?}, body={body}")]
    Finalize { status: Option<u16>, body: String },

    /// 其他对象存储接口错误（不由引擎重试）
    #[error("对象存储接口错误: {0}")]
    Provider(#[source] ProviderError),

    /// 本地读写失败
    #[error("本地读写失败: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    /// 是否为预检失败（未发出任何网络请求）
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidSize(_) | TransferError::TooLarge { .. }
        )
    }
}
