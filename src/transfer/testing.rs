// 测试用的内存对象存储
//
// 同时实现鉴权、签名链接、合并与分片传输接口，并提供故障注入钩子：
// 令牌过期、链接过期、脚本化的 PUT/GET 失败、对象未就绪、传输中途取消。

use crate::oss::provider::{
    CredentialProvider, DownloadUrlProvider, ProviderError, UploadFinalizer, UploadUrlProvider,
    UploadUrlRequest,
};
use crate::oss::storage::{ChunkResponse, ChunkTransport, TransportError};
use crate::oss::types::{ObjectDetails, ObjectStatus, SignedDownloadDescriptor, SignedUrlBatch};
use crate::transfer::orchestrator::TransferOrchestrator;
use crate::transfer::progress::ProgressReporter;
use crate::transfer::types::{TransferOptions, TransferPhase};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 注入的分片传输故障
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// 返回指定状态码
    Status(u16),
    /// 连接失败
    Transport,
    /// 返回少一个字节的响应体（仅 GET）
    Truncated,
}

/// 调用计数快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub token_fetches: u32,
    pub refreshes: u32,
    pub batch_requests: u32,
    pub finalize_calls: u32,
    pub descriptor_requests: u32,
    pub puts: u32,
    pub gets: u32,
}

impl Counters {
    /// 除令牌接口外的网络调用总数
    pub fn network_calls(&self) -> u32 {
        self.batch_requests + self.finalize_calls + self.descriptor_requests + self.puts + self.gets
    }
}

#[derive(Debug, Clone)]
enum Target {
    Part { upload_key: String, index: u64 },
    Object { bucket_key: String, object_key: String },
}

#[derive(Debug)]
struct Issued {
    target: Target,
    generation: u64,
}

#[derive(Default)]
struct FakeState {
    counters: Counters,

    token_generation: u64,
    reject_all_tokens: bool,

    url_serial: u64,
    url_generation: u64,
    min_valid_generation: u64,
    always_expire_urls: bool,
    issued: HashMap<String, Issued>,

    session_serial: u64,
    sessions: HashMap<String, BTreeMap<u64, Vec<u8>>>,
    objects: HashMap<(String, String), Vec<u8>>,
    pending: bool,

    batch_firsts: Vec<u64>,
    put_script: VecDeque<Option<Failure>>,
    get_script: VecDeque<Option<Failure>>,
    finalize_failure: Option<(u16, String)>,

    transfers: u32,
    expire_urls_at: Option<u32>,
    expire_token_at: Option<u32>,
    cancel_at: Option<(u32, CancellationToken)>,
    /// 触发取消时的网络调用数
    calls_at_cancel: Option<u32>,
    replace_object_at: Option<(u32, String, String, Vec<u8>)>,
    failing_refreshes: u32,
}

impl FakeState {
    fn current_token(&self) -> String {
        format!("token-{}", self.token_generation)
    }

    fn check_token(&self, credential: &str) -> Result<(), ProviderError> {
        if self.reject_all_tokens || credential != self.current_token() {
            return Err(ProviderError::CredentialExpired(
                "The token has expired".to_string(),
            ));
        }
        Ok(())
    }

    fn issue(&mut self, target: Target) -> String {
        self.url_serial += 1;
        let url = format!("https://fake-s3.test/{}", self.url_serial);
        self.issued.insert(
            url.clone(),
            Issued {
                target,
                generation: self.url_generation,
            },
        );
        url
    }

    fn expire_urls(&mut self) {
        self.url_generation += 1;
        self.min_valid_generation = self.url_generation;
    }

    fn lookup(&self, url: &str) -> Result<Target, ChunkResponse> {
        match self.issued.get(url) {
            None => Err(ChunkResponse::new(404, b"NoSuchKey".to_vec())),
            Some(issued)
                if self.always_expire_urls || issued.generation < self.min_valid_generation =>
            {
                Err(ChunkResponse::new(403, b"Request has expired".to_vec()))
            }
            Some(issued) => Ok(issued.target.clone()),
        }
    }

    /// 每次分片传输后触发的钩子
    fn after_transfer(&mut self) {
        self.transfers += 1;
        if self.expire_urls_at == Some(self.transfers) {
            self.expire_urls();
        }
        if self.expire_token_at == Some(self.transfers) {
            self.token_generation += 1;
        }
        if let Some((at, token)) = &self.cancel_at {
            if *at == self.transfers {
                token.cancel();
                self.calls_at_cancel = Some(self.counters.network_calls());
            }
        }
        if matches!(&self.replace_object_at, Some((at, ..)) if *at == self.transfers) {
            if let Some((_, bucket_key, object_key, data)) = self.replace_object_at.take() {
                self.objects.insert((bucket_key, object_key), data);
            }
        }
    }

    fn store_part(&mut self, url: &str, data: Vec<u8>) -> ChunkResponse {
        match self.lookup(url) {
            Err(resp) => resp,
            Ok(Target::Part { upload_key, index }) => match self.sessions.get_mut(&upload_key) {
                Some(parts) => {
                    parts.insert(index, data);
                    ChunkResponse::new(200, Vec::new())
                }
                None => ChunkResponse::new(404, b"NoSuchUpload".to_vec()),
            },
            Ok(Target::Object { .. }) => ChunkResponse::new(405, Vec::new()),
        }
    }

    fn read_range(&self, url: &str, range: Range<u64>) -> ChunkResponse {
        match self.lookup(url) {
            Err(resp) => resp,
            Ok(Target::Object {
                bucket_key,
                object_key,
            }) => match self.objects.get(&(bucket_key, object_key)) {
                Some(data) if range.end as usize <= data.len() && range.start <= range.end => {
                    ChunkResponse::new(206, data[range.start as usize..range.end as usize].to_vec())
                }
                Some(_) => ChunkResponse::new(416, Vec::new()),
                None => ChunkResponse::new(404, Vec::new()),
            },
            Ok(Target::Part { .. }) => ChunkResponse::new(405, Vec::new()),
        }
    }
}

/// 内存对象存储
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counters(&self) -> Counters {
        self.state.lock().counters.clone()
    }

    /// 每次链接批次请求的起始分片索引
    pub fn batch_firsts(&self) -> Vec<u64> {
        self.state.lock().batch_firsts.clone()
    }

    pub fn put_object(&self, bucket_key: &str, object_key: &str, data: Vec<u8>) {
        self.state
            .lock()
            .objects
            .insert((bucket_key.to_string(), object_key.to_string()), data);
    }

    pub fn object(&self, bucket_key: &str, object_key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(&(bucket_key.to_string(), object_key.to_string()))
            .cloned()
    }

    /// 下载描述一律返回未就绪
    pub fn set_pending(&self, pending: bool) {
        self.state.lock().pending = pending;
    }

    /// 所有令牌（包括刷新得到的）都判定为过期
    pub fn reject_all_tokens(&self) {
        self.state.lock().reject_all_tokens = true;
    }

    /// 所有签名链接都判定为过期
    pub fn always_expire_urls(&self) {
        self.state.lock().always_expire_urls = true;
    }

    /// 第 n 次分片传输后作废已签发的全部链接
    pub fn expire_urls_after_transfers(&self, n: u32) {
        self.state.lock().expire_urls_at = Some(n);
    }

    /// 第 n 次分片传输后令当前令牌过期
    pub fn expire_token_after_transfers(&self, n: u32) {
        self.state.lock().expire_token_at = Some(n);
    }

    /// 第 n 次分片传输后触发取消
    pub fn cancel_after_transfers(&self, n: u32, token: CancellationToken) {
        self.state.lock().cancel_at = Some((n, token));
    }

    /// 触发取消时已发生的网络调用数（未触发时为 None）
    pub fn calls_at_cancel(&self) -> Option<u32> {
        self.state.lock().calls_at_cancel
    }

    /// 第 n 次分片传输后用新内容替换对象
    pub fn replace_object_after_transfers(
        &self,
        n: u32,
        bucket_key: &str,
        object_key: &str,
        data: Vec<u8>,
    ) {
        self.state.lock().replace_object_at = Some((
            n,
            bucket_key.to_string(),
            object_key.to_string(),
            data,
        ));
    }

    /// 接下来 n 次令牌刷新返回网络错误
    pub fn fail_refreshes(&self, n: u32) {
        self.state.lock().failing_refreshes = n;
    }

    /// 按顺序为后续 PUT 注入故障（None 表示正常处理）
    pub fn script_puts(&self, script: Vec<Option<Failure>>) {
        self.state.lock().put_script = script.into();
    }

    /// 按顺序为后续 GET 注入故障（None 表示正常处理）
    pub fn script_gets(&self, script: Vec<Option<Failure>>) {
        self.state.lock().get_script = script.into();
    }

    pub fn fail_finalize(&self, status: u16, body: &str) {
        self.state.lock().finalize_failure = Some((status, body.to_string()));
    }
}

#[async_trait]
impl CredentialProvider for FakeBackend {
    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        state.counters.token_fetches += 1;
        Ok(state.current_token())
    }

    async fn refresh(&self, expired: &str) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        state.counters.refreshes += 1;
        if state.failing_refreshes > 0 {
            state.failing_refreshes -= 1;
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        if state.reject_all_tokens || expired == state.current_token() {
            state.token_generation += 1;
        }
        Ok(state.current_token())
    }
}

#[async_trait]
impl UploadUrlProvider for FakeBackend {
    async fn request_urls(
        &self,
        request: &UploadUrlRequest<'_>,
        credential: &str,
    ) -> Result<SignedUrlBatch, ProviderError> {
        let mut state = self.state.lock();
        state.counters.batch_requests += 1;
        state.check_token(credential)?;

        let upload_key = match request.upload_key {
            Some(key) if state.sessions.contains_key(key) => key.to_string(),
            Some(key) => {
                return Err(ProviderError::Http {
                    status: 404,
                    body: format!("unknown upload key {}", key),
                })
            }
            None => {
                state.session_serial += 1;
                let key = format!("session-{}", state.session_serial);
                state.sessions.insert(key.clone(), BTreeMap::new());
                key
            }
        };

        state.batch_firsts.push(request.first_part);
        let urls = (request.first_part..request.first_part + request.parts)
            .map(|index| {
                state.issue(Target::Part {
                    upload_key: upload_key.clone(),
                    index,
                })
            })
            .collect();

        Ok(SignedUrlBatch {
            upload_key: Some(upload_key),
            urls,
            first_part_index: request.first_part,
            ..Default::default()
        })
    }
}

#[async_trait]
impl UploadFinalizer for FakeBackend {
    async fn complete_upload(
        &self,
        bucket_key: &str,
        object_key: &str,
        upload_key: &str,
        credential: &str,
    ) -> Result<ObjectDetails, ProviderError> {
        let mut state = self.state.lock();
        state.counters.finalize_calls += 1;
        state.check_token(credential)?;

        if let Some((status, body)) = state.finalize_failure.clone() {
            return Err(ProviderError::Http { status, body });
        }

        let parts = state
            .sessions
            .remove(upload_key)
            .ok_or_else(|| ProviderError::Http {
                status: 404,
                body: "NoSuchUpload".to_string(),
            })?;
        if !parts.keys().copied().eq(0..parts.len() as u64) {
            return Err(ProviderError::Http {
                status: 400,
                body: "missing parts".to_string(),
            });
        }

        let data: Vec<u8> = parts.into_values().flatten().collect();
        let size = data.len() as u64;
        state
            .objects
            .insert((bucket_key.to_string(), object_key.to_string()), data);

        Ok(ObjectDetails {
            bucket_key: bucket_key.to_string(),
            object_key: object_key.to_string(),
            object_id: format!("urn:oss:{}/{}", bucket_key, object_key),
            size,
            content_type: None,
            location: None,
            sha1: None,
        })
    }
}

#[async_trait]
impl DownloadUrlProvider for FakeBackend {
    async fn request_descriptor(
        &self,
        bucket_key: &str,
        object_key: &str,
        _minutes_expiration: Option<u32>,
        credential: &str,
    ) -> Result<SignedDownloadDescriptor, ProviderError> {
        let mut state = self.state.lock();
        state.counters.descriptor_requests += 1;
        state.check_token(credential)?;

        let size = state
            .objects
            .get(&(bucket_key.to_string(), object_key.to_string()))
            .map(|data| data.len() as u64)
            .ok_or_else(|| ProviderError::Http {
                status: 404,
                body: "NoSuchKey".to_string(),
            })?;

        if state.pending {
            return Ok(SignedDownloadDescriptor {
                url: None,
                size,
                status: ObjectStatus::Pending,
                sha1: None,
            });
        }

        let url = state.issue(Target::Object {
            bucket_key: bucket_key.to_string(),
            object_key: object_key.to_string(),
        });
        Ok(SignedDownloadDescriptor {
            url: Some(url),
            size,
            status: ObjectStatus::Complete,
            sha1: None,
        })
    }
}

#[async_trait]
impl ChunkTransport for FakeBackend {
    async fn put_chunk(&self, url: &str, data: Vec<u8>) -> Result<ChunkResponse, TransportError> {
        let mut state = self.state.lock();
        state.counters.puts += 1;

        let result = match state.put_script.pop_front().flatten() {
            Some(Failure::Status(status)) => Ok(ChunkResponse::new(status, b"injected".to_vec())),
            Some(Failure::Transport) => Err(TransportError::Network("connection reset".to_string())),
            Some(Failure::Truncated) | None => Ok(state.store_part(url, data)),
        };

        state.after_transfer();
        result
    }

    async fn get_range(&self, url: &str, range: Range<u64>) -> Result<ChunkResponse, TransportError> {
        let mut state = self.state.lock();
        state.counters.gets += 1;

        let result = match state.get_script.pop_front().flatten() {
            Some(Failure::Status(status)) => Ok(ChunkResponse::new(status, b"injected".to_vec())),
            Some(Failure::Transport) => Err(TransportError::Network("connection reset".to_string())),
            Some(Failure::Truncated) => {
                let mut resp = state.read_range(url, range);
                resp.body.pop();
                Ok(resp)
            }
            None => Ok(state.read_range(url, range)),
        };

        state.after_transfer();
        result
    }
}

/// 记录所有上报的进度值与阶段
#[derive(Default)]
pub struct RecordingProgress {
    values: Mutex<Vec<u8>>,
    phases: Mutex<Vec<TransferPhase>>,
}

impl RecordingProgress {
    pub fn values(&self) -> Vec<u8> {
        self.values.lock().clone()
    }

    pub fn phases(&self) -> Vec<TransferPhase> {
        self.phases.lock().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, percent: u8) {
        self.values.lock().push(percent);
    }

    fn phase_changed(&self, phase: TransferPhase) {
        self.phases.lock().push(phase);
    }
}

/// 小分片、无退避的测试参数
pub fn test_options() -> TransferOptions {
    TransferOptions {
        chunk_size: 4,
        url_batch_size: 3,
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
        ..Default::default()
    }
}

/// 以同一个 FakeBackend 充当全部协作方
pub fn orchestrator(
    fake: &Arc<FakeBackend>,
    options: TransferOptions,
) -> (TransferOrchestrator, Arc<RecordingProgress>) {
    let progress = Arc::new(RecordingProgress::default());
    let orchestrator = TransferOrchestrator::new(fake.clone(), fake.clone(), fake.clone(), options)
        .with_progress(progress.clone());
    (orchestrator, progress)
}

/// 确定性的测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
