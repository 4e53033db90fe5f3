// OSS Transfer Library
// 对象存储分片传输引擎核心库

// 认证模块（OAuth2 客户端凭证）
pub mod auth;

// 配置管理模块
pub mod config;

// 日志系统
pub mod logging;

// 对象存储接口模块
pub mod oss;

// 分片传输引擎
pub mod transfer;

// 公共模块（刷新协调、退避重试）
pub mod common;

// 导出常用类型
pub use auth::{AccessToken, ClientCredentialsAuth};
pub use config::AppConfig;
pub use oss::{
    ChunkTransport, CredentialProvider, DownloadUrlProvider, HttpChunkTransport, ObjectDetails,
    OssClient, ProviderError, UploadFinalizer, UploadUrlProvider,
};
pub use transfer::{
    ByteSource, FileSource, MemorySource, ProgressReporter, TransferError, TransferOptions,
    TransferOrchestrator,
};

pub use common::{RefreshCoordinator, Versioned};
