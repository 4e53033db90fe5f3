//! 传输引擎依赖的外部协作接口
//!
//! 引擎只通过这些 trait 访问鉴权和签名链接服务，HTTP 实现见 [`crate::oss::OssClient`]
//! 和 [`crate::auth::ClientCredentialsAuth`]。

use crate::oss::types::{ObjectDetails, SignedDownloadDescriptor, SignedUrlBatch};
use async_trait::async_trait;

/// 令牌过期的错误特征串（小写匹配）
pub const TOKEN_EXPIRED_SIGNAL: &str = "token has expired";

/// 外部接口调用错误
///
/// 令牌过期与其他错误严格区分，编排器据此决定刷新令牌还是直接失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// 访问令牌过期或失效
    #[error("访问令牌已过期: {0}")]
    CredentialExpired(String),
    /// 非成功的 HTTP 状态
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// 网络/传输层错误
    #[error("网络错误: {0}")]
    Transport(String),
    /// 响应解析失败
    #[error("响应解析失败: {0}")]
    Decode(String),
}

impl ProviderError {
    /// 根据响应状态码和响应体分类
    ///
    /// 401 或响应体包含令牌过期特征串时视为令牌过期
    pub fn from_response(status: u16, body: String) -> Self {
        if status == 401 || is_token_expired_message(&body) {
            ProviderError::CredentialExpired(body)
        } else {
            ProviderError::Http { status, body }
        }
    }

    pub fn is_credential_expired(&self) -> bool {
        matches!(self, ProviderError::CredentialExpired(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// 错误信息是否为令牌过期
pub fn is_token_expired_message(message: &str) -> bool {
    message.to_lowercase().contains(TOKEN_EXPIRED_SIGNAL)
}

/// 访问令牌来源
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 获取访问令牌（每次调用都可能返回新令牌）
    async fn access_token(&self) -> Result<String, ProviderError>;

    /// 用过期令牌换取新令牌
    async fn refresh(&self, expired: &str) -> Result<String, ProviderError>;
}

/// 预签名上传链接请求参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUrlRequest<'a> {
    pub bucket_key: &'a str,
    pub object_key: &'a str,
    /// 本次需要的链接数量
    pub parts: u64,
    /// 第一个链接对应的分片索引（0 起始）
    pub first_part: u64,
    /// 已有的上传会话标识
    pub upload_key: Option<&'a str>,
    /// 链接有效期（分钟）
    pub minutes_expiration: Option<u32>,
}

/// 预签名上传链接提供者
#[async_trait]
pub trait UploadUrlProvider: Send + Sync {
    async fn request_urls(
        &self,
        request: &UploadUrlRequest<'_>,
        credential: &str,
    ) -> Result<SignedUrlBatch, ProviderError>;
}

/// 分片上传完成（合并）接口
#[async_trait]
pub trait UploadFinalizer: Send + Sync {
    async fn complete_upload(
        &self,
        bucket_key: &str,
        object_key: &str,
        upload_key: &str,
        credential: &str,
    ) -> Result<ObjectDetails, ProviderError>;
}

/// 预签名下载描述提供者
#[async_trait]
pub trait DownloadUrlProvider: Send + Sync {
    async fn request_descriptor(
        &self,
        bucket_key: &str,
        object_key: &str,
        minutes_expiration: Option<u32>,
        credential: &str,
    ) -> Result<SignedDownloadDescriptor, ProviderError>;
}
