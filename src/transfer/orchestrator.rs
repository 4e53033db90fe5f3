// 传输编排器
//
// 核心功能：
// 1. 预检分片规划（超限立即失败，不发任何请求）
// 2. 获取/刷新签名链接（链接过期 403 时整批作废重新申请）
// 3. 令牌过期时刷新令牌（与链接刷新相互独立、各自计数）
// 4. 普通失败按指数退避重试
// 5. 单调进度上报，协作式取消
//
// 重试状态机在编排器内部显式分支处理，Worker 只负责单次请求。

use crate::oss::provider::{
    CredentialProvider, DownloadUrlProvider, UploadFinalizer, UploadUrlProvider,
};
use crate::oss::storage::{ChunkResponse, ChunkTransport, TransportError};
use crate::transfer::progress::{NoopProgress, ProgressReporter};
use crate::transfer::types::TransferOptions;
use std::sync::Arc;

/// 单次分片请求的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChunkOutcome {
    /// 2xx
    Success(Vec<u8>),
    /// 403：签名链接过期
    UrlExpired(String),
    /// 其他 HTTP 错误或网络错误
    Failed { status: Option<u16>, body: String },
}

/// 按状态码分类分片请求结果
pub(crate) fn classify_response(result: Result<ChunkResponse, TransportError>) -> ChunkOutcome {
    match result {
        Ok(resp) if (200..300).contains(&resp.status) => ChunkOutcome::Success(resp.body),
        Ok(resp) if resp.status == 403 => ChunkOutcome::UrlExpired(resp.body_text()),
        Ok(resp) => ChunkOutcome::Failed {
            status: Some(resp.status),
            body: resp.body_text(),
        },
        Err(e) => ChunkOutcome::Failed {
            status: None,
            body: e.to_string(),
        },
    }
}

/// 传输编排器
///
/// 依赖全部由调用方注入，不持有任何全局状态；
/// 每次 upload/download 调用的传输状态都是独立的。
pub struct TransferOrchestrator {
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) upload_urls: Arc<dyn UploadUrlProvider>,
    pub(crate) finalizer: Arc<dyn UploadFinalizer>,
    pub(crate) download_urls: Arc<dyn DownloadUrlProvider>,
    pub(crate) transport: Arc<dyn ChunkTransport>,
    pub(crate) progress: Arc<dyn ProgressReporter>,
    pub(crate) options: TransferOptions,
}

impl TransferOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// * `credentials` - 令牌来源
    /// * `backend` - 同时提供上传链接、合并、下载描述的对象存储接口
    /// * `transport` - 分片传输 Worker
    /// * `options` - 传输参数
    pub fn new<B>(
        credentials: Arc<dyn CredentialProvider>,
        backend: Arc<B>,
        transport: Arc<dyn ChunkTransport>,
        options: TransferOptions,
    ) -> Self
    where
        B: UploadUrlProvider + UploadFinalizer + DownloadUrlProvider + 'static,
    {
        Self {
            credentials,
            upload_urls: backend.clone(),
            finalizer: backend.clone(),
            download_urls: backend,
            transport,
            progress: Arc::new(NoopProgress),
            options,
        }
    }

    /// 设置进度接收方
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        let outcome = classify_response(Ok(ChunkResponse::new(206, b"abc".to_vec())));
        assert_eq!(outcome, ChunkOutcome::Success(b"abc".to_vec()));
    }

    #[test]
    fn test_classify_forbidden_is_url_expired() {
        let outcome = classify_response(Ok(ChunkResponse::new(403, b"expired".to_vec())));
        assert_eq!(outcome, ChunkOutcome::UrlExpired("expired".to_string()));
    }

    #[test]
    fn test_classify_other_errors() {
        let outcome = classify_response(Ok(ChunkResponse::new(500, b"oops".to_vec())));
        assert_eq!(
            outcome,
            ChunkOutcome::Failed {
                status: Some(500),
                body: "oops".to_string()
            }
        );

        let outcome = classify_response(Ok(ChunkResponse::new(404, vec![])));
        assert!(matches!(outcome, ChunkOutcome::Failed { status: Some(404), .. }));

        let outcome = classify_response(Err(TransportError::Timeout("slow".to_string())));
        assert!(matches!(outcome, ChunkOutcome::Failed { status: None, .. }));
    }
}
