// 分片上传
//
// 上传流程：
// 1. 预检分片规划
// 2. 获取初始令牌，上报起始进度
// 3. 逐个（或并发）上传分片：按需申请签名链接批次，403 整批刷新，其余错误退避重试
// 4. 全部分片成功后调用合并接口，合并成功才上报 100%
//
// 并发上传策略：
// - 使用 Semaphore 控制最大并发分片数
// - 使用 JoinSet 管理并发任务
// - 链接池由异步互斥锁保护，批次请求串行化
// - 令牌刷新经由刷新协调器，同一代只刷新一次

use crate::common::{calculate_backoff_delay, sleep_or_cancel};
use crate::oss::provider::{ProviderError, UploadUrlProvider, UploadUrlRequest};
use crate::oss::storage::ChunkTransport;
use crate::oss::types::ObjectDetails;
use crate::transfer::chunk::{plan_chunks, ChunkRange};
use crate::transfer::credential::{ensure_not_cancelled, CredentialStore};
use crate::transfer::error::TransferError;
use crate::transfer::orchestrator::{classify_response, ChunkOutcome, TransferOrchestrator};
use crate::transfer::progress::{
    chunk_percent, MonotonicProgress, ProgressReporter, COMPLETE_PERCENT, START_PERCENT,
};
use crate::transfer::source::{ByteSource, FileSource};
use crate::transfer::types::{
    ChunkAttempts, Direction, TransferOptions, TransferPhase, TransferRequest, TransferState,
};
use crate::transfer::url_pool::UrlPool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// 单次上传的共享上下文
struct UploadContext {
    request: TransferRequest,
    options: TransferOptions,
    source: Arc<dyn ByteSource>,
    transport: Arc<dyn ChunkTransport>,
    upload_urls: Arc<dyn UploadUrlProvider>,
    credentials: CredentialStore,
    /// 签名链接池（持锁者才能申请新批次）
    pool: Mutex<UrlPool>,
    progress: MonotonicProgress,
    state: Arc<TransferState>,
    cancel: CancellationToken,
}

impl UploadContext {
    /// 上传单个分片（带重试）
    async fn upload_chunk(&self, chunk: &ChunkRange) -> Result<(), TransferError> {
        let mut attempts = ChunkAttempts::default();

        loop {
            ensure_not_cancelled(&self.cancel)?;

            let url = self.url_for(chunk.index).await?;
            let data = self
                .source
                .read_at(chunk.range.start, chunk.len() as usize)
                .await?;

            ensure_not_cancelled(&self.cancel)?;
            self.state.enter(TransferPhase::TransferringChunk);
            debug!(
                "[分片#{}] 开始上传 (范围: {}..{}, 大小: {} bytes)",
                chunk.index,
                chunk.range.start,
                chunk.range.end,
                chunk.len()
            );

            match classify_response(self.transport.put_chunk(&url, data).await) {
                ChunkOutcome::Success(_) => {
                    self.pool.lock().await.release(chunk.index);
                    let completed = self.state.complete_chunk();
                    let total = self.state.total_chunks();
                    self.progress.report(chunk_percent(completed, total));
                    debug!(
                        "[分片#{}] ✓ 上传成功 ({}/{} 完成)",
                        chunk.index, completed, total
                    );
                    return Ok(());
                }
                ChunkOutcome::UrlExpired(body) => {
                    if attempts.url_refreshes >= self.options.max_retry_on_url_expiry {
                        error!(
                            "[分片#{}] 签名链接过期，刷新次数已用尽 ({})",
                            chunk.index, self.options.max_retry_on_url_expiry
                        );
                        return Err(TransferError::UrlExpiredExhausted {
                            chunk_index: chunk.index,
                            attempts: attempts.url_refreshes,
                        });
                    }
                    attempts.url_refreshes += 1;
                    warn!(
                        "[分片#{}] 签名链接已过期，刷新链接 ({}/{}): {}",
                        chunk.index,
                        attempts.url_refreshes,
                        self.options.max_retry_on_url_expiry,
                        body
                    );
                    self.refresh_urls(chunk.index, &url).await?;
                }
                ChunkOutcome::Failed { status, body } => {
                    attempts.failures += 1;
                    if attempts.failures >= self.options.max_retry_per_chunk {
                        error!(
                            "[分片#{}] 上传失败，已达最大尝试次数 ({})",
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
                        "[分片#{}] 上传失败，等待 {}ms 后重试 ({}/{}): status={:?}, body={}",
                        chunk.index,
                        backoff_ms,
                        attempts.failures,
                        self.options.max_retry_per_chunk,
                        status,
                        body
                    );
                    if !sleep_or_cancel(backoff_ms, &self.cancel).await {
                        return Err(TransferError::Cancelled);
                    }
                }
            }
        }
    }

    /// 获取分片的签名链接，链接池中没有时申请新批次
    async fn url_for(&self, index: u64) -> Result<String, TransferError> {
        let mut pool = self.pool.lock().await;
        if let Some(url) = pool.url_for(index) {
            return Ok(url.to_string());
        }

        self.state.enter(TransferPhase::AcquiringUrls);
        self.fetch_batch(&mut pool, index).await?;

        pool.url_for(index).map(str::to_string).ok_or_else(|| {
            TransferError::Provider(ProviderError::Decode(format!(
                "链接批次中缺少分片 #{} 的链接",
                index
            )))
        })
    }

    /// 链接过期：作废整批并从该分片起重新申请
    ///
    /// 若链接已被其他任务刷新则什么都不做
    async fn refresh_urls(&self, index: u64, expired: &str) -> Result<(), TransferError> {
        let mut pool = self.pool.lock().await;
        if pool.invalidate_if_current(index, expired) {
            self.state.enter(TransferPhase::RefreshingUrls);
            self.fetch_batch(&mut pool, index).await?;
        } else {
            debug!("[分片#{}] 链接已被其他任务刷新", index);
        }
        Ok(())
    }

    /// 申请一批签名链接（调用方须持有链接池锁）
    async fn fetch_batch(&self, pool: &mut UrlPool, first: u64) -> Result<(), TransferError> {
        let remaining = self.state.total_chunks().saturating_sub(first);
        let parts = self.options.url_batch_size.min(remaining).max(1);

        let upload_key = pool.upload_key().map(str::to_string);
        let url_request = UploadUrlRequest {
            bucket_key: &self.request.bucket_key,
            object_key: &self.request.object_key,
            parts,
            first_part: first,
            upload_key: upload_key.as_deref(),
            minutes_expiration: self.options.url_expiry_minutes,
        };
        let url_request = &url_request;
        let provider = &self.upload_urls;

        let batch = self
            .credentials
            .call(&self.state, &self.cancel, move |credential| async move {
                provider.request_urls(url_request, &credential).await
            })
            .await?;

        debug!(
            "获取签名链接: 分片 #{} 起共 {} 个, 新会话={}",
            first,
            batch.urls.len(),
            upload_key.is_none()
        );
        pool.absorb(batch);
        Ok(())
    }
}

impl TransferOrchestrator {
    /// 上传对象
    ///
    /// # 参数
    /// * `bucket_key` - 存储桶
    /// * `object_key` - 对象键
    /// * `source` - 数据源
    /// * `cancel` - 取消令牌
    ///
    /// # 返回
    /// 合并成功后的对象描述；任一预算耗尽或取消时返回对应错误，不会留下"部分成功"
    pub async fn upload(
        &self,
        bucket_key: &str,
        object_key: &str,
        source: Arc<dyn ByteSource>,
        cancel: &CancellationToken,
    ) -> Result<ObjectDetails, TransferError> {
        let request = TransferRequest::new(
            bucket_key,
            object_key,
            source.len(),
            self.options.chunk_size,
            Direction::Upload,
        );
        let span = info_span!(
            "transfer",
            id = %Uuid::new_v4(),
            direction = %request.direction,
            object = %request.object_key
        );

        async move {
            info!(
                "开始上传: bucket={}, object={}, size={}",
                request.bucket_key, request.object_key, request.total_size
            );

            let state = Arc::new(TransferState::with_observer(
                request.total_chunks(),
                self.progress.clone(),
            ));
            let result = self.run_upload(request, source, state.clone(), cancel).await;

            match &result {
                Ok(details) => {
                    state.enter(TransferPhase::Complete);
                    info!("上传完成: object={}, size={}", details.object_key, details.size);
                }
                Err(e) => {
                    state.enter(TransferPhase::Failed);
                    error!("上传失败: {}", e);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// 上传本地文件
    pub async fn upload_file(
        &self,
        bucket_key: &str,
        object_key: &str,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<ObjectDetails, TransferError> {
        let source = FileSource::open(path).await?;
        self.upload(bucket_key, object_key, Arc::new(source), cancel)
            .await
    }

    async fn run_upload(
        &self,
        request: TransferRequest,
        source: Arc<dyn ByteSource>,
        state: Arc<TransferState>,
        cancel: &CancellationToken,
    ) -> Result<ObjectDetails, TransferError> {
        // 预检：超限直接失败，不发任何请求
        let plan = plan_chunks(
            request.total_size,
            request.chunk_size,
            self.options.max_chunk_count,
        )?;

        ensure_not_cancelled(cancel)?;
        let credentials = CredentialStore::acquire(
            self.credentials.clone(),
            self.options.max_retry_on_token_expiry,
            cancel,
        )
        .await?;

        let ctx = Arc::new(UploadContext {
            request,
            options: self.options.clone(),
            source,
            transport: self.transport.clone(),
            upload_urls: self.upload_urls.clone(),
            credentials,
            pool: Mutex::new(UrlPool::new()),
            progress: MonotonicProgress::new(self.progress.clone()),
            state,
            cancel: cancel.clone(),
        });
        ctx.progress.report(START_PERCENT);

        let max_concurrent = self.options.max_concurrent_chunks.max(1);
        if max_concurrent == 1 || plan.len() == 1 {
            for chunk in &plan {
                ctx.upload_chunk(chunk).await?;
            }
        } else {
            upload_chunks_concurrent(&ctx, plan, max_concurrent).await?;
        }

        ensure_not_cancelled(cancel)?;
        let details = self.finalize(&ctx).await?;
        ctx.progress.report(COMPLETE_PERCENT);

        let batches = ctx.pool.lock().await.batches();
        info!(
            "上传统计: 分片={}, 链接批次={}, 令牌刷新={}",
            ctx.state.total_chunks(),
            batches,
            ctx.credentials.refresh_count()
        );
        Ok(details)
    }

    /// 合并分片
    ///
    /// 只处理令牌过期；其他失败一律视为合并失败，不重试
    async fn finalize(&self, ctx: &UploadContext) -> Result<ObjectDetails, TransferError> {
        ctx.state.enter(TransferPhase::Finalizing);

        let upload_key = ctx
            .pool
            .lock()
            .await
            .upload_key()
            .map(str::to_string)
            .ok_or_else(|| TransferError::Finalize {
                status: None,
                body: "缺少 uploadKey".to_string(),
            })?;

        info!("合并上传分片: object={}", ctx.request.object_key);

        let finalizer = &self.finalizer;
        let request = &ctx.request;
        let upload_key = upload_key.as_str();

        ctx.credentials
            .call(&ctx.state, &ctx.cancel, move |credential| async move {
                finalizer
                    .complete_upload(
                        &request.bucket_key,
                        &request.object_key,
                        upload_key,
                        &credential,
                    )
                    .await
            })
            .await
            .map_err(|e| match e {
                TransferError::Provider(ProviderError::Http { status, body }) => {
                    TransferError::Finalize {
                        status: Some(status),
                        body,
                    }
                }
                TransferError::Provider(other) => TransferError::Finalize {
                    status: None,
                    body: other.to_string(),
                },
                other => other,
            })
    }
}

/// 分片任务结果；许可随结果返回，调度方检查结果后才释放并发槽位
type ChunkTaskOutput = (Result<u64, TransferError>, OwnedSemaphorePermit);

/// 并发上传分片
///
/// 按索引顺序调度，并发数由信号量限制；任一分片失败即中止其余任务。
/// 收到取消信号时不再调度新分片，等待在途分片自行结束。
async fn upload_chunks_concurrent(
    ctx: &Arc<UploadContext>,
    plan: Vec<ChunkRange>,
    max_concurrent: usize,
) -> Result<(), TransferError> {
    info!(
        "[并发上传] 开始上传 {} 个分片，并发数: {}",
        plan.len(),
        max_concurrent
    );

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut join_set: JoinSet<ChunkTaskOutput> = JoinSet::new();

    for chunk in plan {
        // 尽早发现已失败的分片
        while let Some(result) = join_set.try_join_next() {
            if let Err(e) = settle(result) {
                return Err(abort_on_error(&mut join_set, e).await);
            }
        }

        let permit = loop {
            if let Ok(permit) = semaphore.clone().try_acquire_owned() {
                break permit;
            }

            // 槽位已满：等待一个分片结束，检查其结果后槽位才空出
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    drain(&mut join_set).await;
                    return Err(TransferError::Cancelled);
                }
                Some(result) = join_set.join_next() => {
                    if let Err(e) = settle(result) {
                        return Err(abort_on_error(&mut join_set, e).await);
                    }
                }
            }
        };

        if ctx.cancel.is_cancelled() {
            drain(&mut join_set).await;
            return Err(TransferError::Cancelled);
        }

        let task_ctx = ctx.clone();
        join_set.spawn(async move {
            let result = task_ctx.upload_chunk(&chunk).await.map(|_| chunk.index);
            (result, permit)
        });
    }

    while let Some(result) = join_set.join_next().await {
        if let Err(e) = settle(result) {
            return Err(abort_on_error(&mut join_set, e).await);
        }
    }

    info!("[并发上传] 所有分片上传完成");
    Ok(())
}

/// 展开任务结果并释放其并发许可
fn settle(result: Result<ChunkTaskOutput, JoinError>) -> Result<u64, TransferError> {
    match result {
        Ok((inner, _permit)) => inner,
        Err(e) => {
            error!("分片任务异常: {}", e);
            Err(TransferError::Io(std::io::Error::other(format!(
                "分片任务异常: {}",
                e
            ))))
        }
    }
}

/// 分片失败后的收尾：取消时等待在途分片结束，其他错误直接中止
async fn abort_on_error(
    join_set: &mut JoinSet<ChunkTaskOutput>,
    e: TransferError,
) -> TransferError {
    if e.is_cancelled() {
        drain(join_set).await;
    } else {
        join_set.abort_all();
    }
    e
}

/// 等待所有在途任务结束，忽略结果
async fn drain(join_set: &mut JoinSet<ChunkTaskOutput>) {
    while join_set.join_next().await.is_some() {}
}
