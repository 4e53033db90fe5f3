// 对象存储接口模块
//
// - provider: 传输引擎消费的外部协作接口（鉴权、签名链接、合并）
// - client:   上述接口的 REST 实现
// - storage:  预签名链接上的原始分片 PUT / Range GET

pub mod client;
pub mod provider;
pub mod storage;
pub mod types;

pub use client::OssClient;
pub use provider::{
    is_token_expired_message, CredentialProvider, DownloadUrlProvider, ProviderError,
    UploadFinalizer, UploadUrlProvider, UploadUrlRequest, TOKEN_EXPIRED_SIGNAL,
};
pub use storage::{ChunkResponse, ChunkTransport, HttpChunkTransport, TransportError};
pub use types::{ObjectDetails, ObjectStatus, SignedDownloadDescriptor, SignedUrlBatch};
