// 分片下载
//
// 下载流程：
// 1. 获取初始令牌，上报起始进度
// 2. 请求下载描述；对象未合并完成时直接失败，不发任何 GET
// 3. 按对象大小规划分片，顺序发起 Range GET
// 4. 403 视为链接过期，重新请求描述（大小变化则以 ObjectChanged 失败）；其他错误退避重试
// 5. 全部写入后才上报 100%

use crate::common::{calculate_backoff_delay, sleep_or_cancel};
use crate::oss::provider::DownloadUrlProvider;
use crate::oss::storage::ChunkTransport;
use crate::oss::types::SignedDownloadDescriptor;
use crate::transfer::chunk::{plan_chunks, ChunkRange};
use crate::transfer::credential::{ensure_not_cancelled, CredentialStore};
use crate::transfer::error::TransferError;
use crate::transfer::orchestrator::{classify_response, ChunkOutcome, TransferOrchestrator};
use crate::transfer::progress::{
    chunk_percent, MonotonicProgress, ProgressReporter, COMPLETE_PERCENT, START_PERCENT,
};
use crate::transfer::types::{
    ChunkAttempts, Direction, TransferOptions, TransferPhase, TransferState,
};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// 下载数据的写入目标（按分片顺序写入）
#[async_trait]
trait ChunkSink: Send {
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// 全部分片写入成功后调用
    async fn commit(&mut self) -> io::Result<()>;
}

#[async_trait]
impl ChunkSink for Vec<u8> {
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    async fn commit(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 先写入 `{path}.part`，提交时重命名为目标文件
struct PartFile {
    file: tokio::fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl PartFile {
    async fn create(path: &Path) -> io::Result<Self> {
        let final_path = path.to_path_buf();
        let mut temp = final_path.clone().into_os_string();
        temp.push(".part");
        let temp_path = PathBuf::from(temp);

        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = tokio::fs::File::create(&temp_path).await?;
        debug!("创建临时文件: {:?}", temp_path);

        Ok(Self {
            file,
            temp_path,
            final_path,
        })
    }

    /// 失败时删除临时文件
    async fn discard(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.temp_path).await {
            warn!("删除临时文件失败: {:?}, 错误: {}", self.temp_path, e);
        }
    }
}

#[async_trait]
impl ChunkSink for PartFile {
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    async fn commit(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        tokio::fs::rename(&self.temp_path, &self.final_path).await?;
        debug!("临时文件已重命名为: {:?}", self.final_path);
        Ok(())
    }
}

/// 单次下载的上下文
struct DownloadContext<'a> {
    bucket_key: &'a str,
    object_key: &'a str,
    options: &'a TransferOptions,
    transport: &'a dyn ChunkTransport,
    download_urls: &'a dyn DownloadUrlProvider,
    credentials: CredentialStore,
    progress: MonotonicProgress,
    state: &'a TransferState,
    cancel: &'a CancellationToken,
}

impl DownloadContext<'_> {
    /// 请求下载描述（带令牌刷新）
    async fn request_descriptor(&self) -> Result<SignedDownloadDescriptor, TransferError> {
        let provider = self.download_urls;
        let bucket_key = self.bucket_key;
        let object_key = self.object_key;
        let minutes = self.options.url_expiry_minutes;

        self.credentials
            .call(self.state, self.cancel, move |credential| async move {
                provider
                    .request_descriptor(bucket_key, object_key, minutes, &credential)
                    .await
            })
            .await
    }

    /// 请求描述并确认对象已就绪
    async fn ready_descriptor(&self) -> Result<SignedDownloadDescriptor, TransferError> {
        let descriptor = self.request_descriptor().await?;
        if !descriptor.is_complete() {
            warn!(
                "对象尚未合并完成: {}/{}, status={:?}",
                self.bucket_key, self.object_key, descriptor.status
            );
            return Err(TransferError::ObjectNotReady {
                bucket_key: self.bucket_key.to_string(),
                object_key: self.object_key.to_string(),
            });
        }
        Ok(descriptor)
    }

    /// 下载单个分片（带重试）
    ///
    /// 链接过期时会替换 `descriptor`，后续分片使用新链接
    async fn download_chunk(
        &self,
        chunk: &ChunkRange,
        descriptor: &mut SignedDownloadDescriptor,
    ) -> Result<Vec<u8>, TransferError> {
        let mut attempts = ChunkAttempts::default();

        loop {
            ensure_not_cancelled(self.cancel)?;

            let url = descriptor.url.clone().ok_or_else(|| TransferError::ObjectNotReady {
                bucket_key: self.bucket_key.to_string(),
                object_key: self.object_key.to_string(),
            })?;

            self.state.enter(TransferPhase::TransferringChunk);
            debug!(
                "[分片#{}] 开始下载 (范围: {}..{})",
                chunk.index, chunk.range.start, chunk.range.end
            );

            let outcome = classify_response(
                self.transport.get_range(&url, chunk.range.clone()).await,
            );

            let (status, body) = match outcome {
                ChunkOutcome::Success(data) if data.len() as u64 == chunk.len() => {
                    return Ok(data);
                }
                ChunkOutcome::Success(data) => (
                    None,
                    format!("分片长度不符: 期望 {} 实际 {}", chunk.len(), data.len()),
                ),
                ChunkOutcome::UrlExpired(body) => {
                    if attempts.url_refreshes >= self.options.max_retry_on_url_expiry {
                        error!(
                            "[分片#{}] 下载链接过期，刷新次数已用尽 ({})",
                            chunk.index, self.options.max_retry_on_url_expiry
                        );
                        return Err(TransferError::UrlExpiredExhausted {
                            chunk_index: chunk.index,
                            attempts: attempts.url_refreshes,
                        });
                    }
                    attempts.url_refreshes += 1;
                    warn!(
                        "[分片#{}] 下载链接已过期，重新获取 ({}/{}): {}",
                        chunk.index,
                        attempts.url_refreshes,
                        self.options.max_retry_on_url_expiry,
                        body
                    );

                    self.state.enter(TransferPhase::RefreshingUrls);
                    let refreshed = self.ready_descriptor().await?;
                    if refreshed.size != descriptor.size {
                        error!(
                            "[分片#{}] 对象大小在下载过程中变化: {} -> {}",
                            chunk.index, descriptor.size, refreshed.size
                        );
                        return Err(TransferError::ObjectChanged {
                            expected: descriptor.size,
                            actual: refreshed.size,
                        });
                    }
                    *descriptor = refreshed;
                    continue;
                }
                ChunkOutcome::Failed { status, body } => (status, body),
            };

            attempts.failures += 1;
            if attempts.failures >= self.options.max_retry_per_chunk {
                error!(
                    "[分片#{}] 下载失败，已达最大尝试次数 ({})",
                    chunk.index, self.options.max_retry_per_chunk
                );
                return Err(TransferError::ChunkTransfer {
                    chunk_index: chunk.index,
                    status,
                    body,
                    attempts: attempts.failures,
                });
            }

            let backoff_ms = calculate_backoff_delay(
                attempts.failures - 1,
                self.options.initial_backoff_ms,
                self.options.max_backoff_ms,
            );
            warn!(
                "[分片#{}] 下载失败，等待 {}ms 后重试 ({}/{}): status={:?}, body={}",
                chunk.index,
                backoff_ms,
                attempts.failures,
                self.options.max_retry_per_chunk,
                status,
                body
            );
            if !sleep_or_cancel(backoff_ms, self.cancel).await {
                return Err(TransferError::Cancelled);
            }
        }
    }
}

impl TransferOrchestrator {
    /// 下载对象到内存
    pub async fn download(
        &self,
        bucket_key: &str,
        object_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransferError> {
        let mut buffer = Vec::new();
        self.download_into(bucket_key, object_key, &mut buffer, cancel)
            .await?;
        Ok(buffer)
    }

    /// 下载对象到本地文件
    ///
    /// 数据先写入 `{path}.part`，全部成功后重命名；失败时删除临时文件，
    /// 目标路径上已有的文件保持不变。
    ///
    /// # 返回
    /// 写入的字节数
    pub async fn download_to_file(
        &self,
        bucket_key: &str,
        object_key: &str,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let mut part = PartFile::create(path.as_ref()).await?;

        match self
            .download_into(bucket_key, object_key, &mut part, cancel)
            .await
        {
            Ok(size) => Ok(size),
            Err(e) => {
                part.discard().await;
                Err(e)
            }
        }
    }

    async fn download_into<S: ChunkSink>(
        &self,
        bucket_key: &str,
        object_key: &str,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let span = info_span!(
            "transfer",
            id = %Uuid::new_v4(),
            direction = %Direction::Download,
            object = %object_key
        );

        async move {
            info!("开始下载: bucket={}, object={}", bucket_key, object_key);

            // 分片数在拿到对象大小后才确定
            let state = TransferState::with_observer(0, self.progress.clone());
            let result = self
                .run_download(bucket_key, object_key, sink, &state, cancel)
                .await;

            match &result {
                Ok(size) => {
                    state.enter(TransferPhase::Complete);
                    info!("下载完成: object={}, size={}", object_key, size);
                }
                Err(e) => {
                    state.enter(TransferPhase::Failed);
                    error!("下载失败: {}", e);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_download<S: ChunkSink>(
        &self,
        bucket_key: &str,
        object_key: &str,
        sink: &mut S,
        state: &TransferState,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        if self.options.chunk_size == 0 {
            return Err(TransferError::InvalidSize(
                "分片大小必须大于 0".to_string(),
            ));
        }

        ensure_not_cancelled(cancel)?;
        let credentials = CredentialStore::acquire(
            self.credentials.clone(),
            self.options.max_retry_on_token_expiry,
            cancel,
        )
        .await?;

        let ctx = DownloadContext {
            bucket_key,
            object_key,
            options: &self.options,
            transport: self.transport.as_ref(),
            download_urls: self.download_urls.as_ref(),
            credentials,
            progress: MonotonicProgress::new(self.progress.clone()),
            state,
            cancel,
        };
        ctx.progress.report(START_PERCENT);

        state.enter(TransferPhase::AcquiringUrls);
        let mut descriptor = ctx.ready_descriptor().await?;
        let total_size = descriptor.size;

        let plan = plan_chunks(
            total_size,
            self.options.chunk_size,
            self.options.max_chunk_count,
        )?;
        state.set_total_chunks(plan.len() as u64);

        let mut written = 0u64;
        for chunk in &plan {
            if !chunk.is_empty() {
                let data = ctx.download_chunk(chunk, &mut descriptor).await?;
                sink.write_chunk(&data).await?;
                written += data.len() as u64;
            }

            let completed = state.complete_chunk();
            ctx.progress
                .report(chunk_percent(completed, state.total_chunks()));
            debug!(
                "[分片#{}] ✓ 下载成功 ({}/{} 完成)",
                chunk.index,
                completed,
                plan.len()
            );
        }

        // 每个分片的长度已在 download_chunk 中校验
        debug_assert_eq!(written, total_size);

        ensure_not_cancelled(cancel)?;
        state.enter(TransferPhase::Finalizing);
        sink.commit().await?;
        ctx.progress.report(COMPLETE_PERCENT);

        info!(
            "下载统计: 分片={}, 令牌刷新={}",
            plan.len(),
            ctx.credentials.refresh_count()
        );
        Ok(written)
    }
}
