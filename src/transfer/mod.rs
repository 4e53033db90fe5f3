// 分片传输模块
//
// 按固定大小分片上传/下载对象，处理签名链接过期、令牌过期和普通失败三类重试

pub mod chunk;
mod credential;
mod download;
pub mod error;
mod orchestrator;
pub mod progress;
pub mod source;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;
mod upload;
mod url_pool;

pub use chunk::{plan_chunks, ChunkRange, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNK_COUNT};
pub use error::TransferError;
pub use orchestrator::TransferOrchestrator;
pub use progress::{chunk_percent, LogProgress, MonotonicProgress, NoopProgress, ProgressReporter};
pub use source::{ByteSource, FileSource, MemorySource};
pub use types::{Direction, TransferOptions, TransferPhase, TransferRequest, TransferState};
