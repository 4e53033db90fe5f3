// 分片传输 Worker
//
// 对预签名链接执行单次 PUT（上传）或 Range GET（下载）
// - 不携带应用层鉴权头，授权信息已嵌入链接
// - 内部不重试，所有重试策略由编排器决定

use async_trait::async_trait;
use reqwest::Client;
use std::ops::Range;
use std::time::Duration;
use tracing::debug;

/// 默认单次请求超时（秒）
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// 分片请求的原始响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResponse {
    /// HTTP 状态码
    pub status: u16,
    /// 响应体（下载时为分片数据，上传时为服务端返回文本）
    pub body: Vec<u8>,
}

impl ChunkResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// 响应体文本（用于错误诊断）
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// 传输层错误（连接失败、超时等，未拿到 HTTP 响应）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("请求超时: {0}")]
    Timeout(String),
    #[error("网络错误: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// 分片字节传输
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// PUT 分片数据到预签名链接
    async fn put_chunk(&self, url: &str, data: Vec<u8>) -> Result<ChunkResponse, TransportError>;

    /// 以 `Range: bytes=start-(end-1)` 读取对象的一段（`range` 左闭右开且非空）
    async fn get_range(&self, url: &str, range: Range<u64>)
        -> Result<ChunkResponse, TransportError>;
}

/// 基于 reqwest 的分片传输实现
#[derive(Debug, Clone)]
pub struct HttpChunkTransport {
    client: Client,
    timeout: Duration,
}

impl HttpChunkTransport {
    /// 使用已有的 HTTP 客户端
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// 使用默认超时创建
    pub fn with_default_timeout(client: Client) -> Self {
        Self::new(client, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    async fn put_chunk(&self, url: &str, data: Vec<u8>) -> Result<ChunkResponse, TransportError> {
        let size = data.len();
        let resp = self
            .client
            .put(url)
            .body(data)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        debug!("PUT 分片: size={} bytes, status={}", size, status);

        Ok(ChunkResponse::new(status, body))
    }

    async fn get_range(
        &self,
        url: &str,
        range: Range<u64>,
    ) -> Result<ChunkResponse, TransportError> {
        let resp = self
            .client
            .get(url)
            .header(
                "Range",
                format!("bytes={}-{}", range.start, range.end.saturating_sub(1)),
            )
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        debug!(
            "GET 分片: bytes={}-{}, status={}, 实际大小={}",
            range.start,
            range.end.saturating_sub(1),
            status,
            body.len()
        );

        Ok(ChunkResponse::new(status, body))
    }
}
