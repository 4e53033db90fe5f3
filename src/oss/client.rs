// 对象存储 REST 客户端
//
// 只覆盖传输引擎需要的三个端点：
// - GET  .../signeds3upload   获取一批预签名上传链接
// - POST .../signeds3upload   完成分片上传（服务端合并）
// - GET  .../signeds3download 获取预签名下载描述

use crate::oss::provider::{
    DownloadUrlProvider, ProviderError, UploadFinalizer, UploadUrlProvider, UploadUrlRequest,
};
use crate::oss::types::{
    CompleteUploadBody, ObjectDetails, SignedDownloadDescriptor, SignedUrlBatch,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

/// 对象存储 REST 客户端
#[derive(Debug, Clone)]
pub struct OssClient {
    client: Client,
    base_url: String,
}

impl OssClient {
    /// 创建客户端
    ///
    /// # 参数
    /// * `client` - 共享的 HTTP 客户端
    /// * `base_url` - 服务根地址，如 `https://developer.api.autodesk.com`
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn object_url(&self, bucket_key: &str, object_key: &str, action: &str) -> String {
        format!(
            "{}/oss/v2/buckets/{}/objects/{}/{}",
            self.base_url,
            urlencoding::encode(bucket_key),
            urlencoding::encode(object_key),
            action
        )
    }

    /// 读取 JSON 响应，非 2xx 状态按令牌过期/普通错误分类
    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = ProviderError::from_response(status.as_u16(), text);
            warn!("对象存储接口返回错误: {}", err);
            return Err(err);
        }

        serde_json::from_str(&text).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl UploadUrlProvider for OssClient {
    async fn request_urls(
        &self,
        request: &UploadUrlRequest<'_>,
        credential: &str,
    ) -> Result<SignedUrlBatch, ProviderError> {
        let url = self.object_url(request.bucket_key, request.object_key, "signeds3upload");

        // 服务端分片序号从 1 开始
        let mut query: Vec<(&str, String)> = vec![
            ("parts", request.parts.to_string()),
            ("firstPart", (request.first_part + 1).to_string()),
        ];
        if let Some(upload_key) = request.upload_key {
            query.push(("uploadKey", upload_key.to_string()));
        }
        if let Some(minutes) = request.minutes_expiration {
            query.push(("minutesExpiration", minutes.to_string()));
        }

        debug!(
            "请求上传链接: object={}, parts={}, first_part={}, has_upload_key={}",
            request.object_key,
            request.parts,
            request.first_part,
            request.upload_key.is_some()
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential)
            .query(&query)
            .send()
            .await?;

        let mut batch: SignedUrlBatch = Self::read_json(response).await?;
        batch.first_part_index = request.first_part;

        if batch.urls.is_empty() {
            return Err(ProviderError::Decode("上传链接列表为空".to_string()));
        }

        Ok(batch)
    }
}

#[async_trait]
impl UploadFinalizer for OssClient {
    async fn complete_upload(
        &self,
        bucket_key: &str,
        object_key: &str,
        upload_key: &str,
        credential: &str,
    ) -> Result<ObjectDetails, ProviderError> {
        let url = self.object_url(bucket_key, object_key, "signeds3upload");

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential)
            .json(&CompleteUploadBody { upload_key })
            .send()
            .await?;

        let details: ObjectDetails = Self::read_json(response).await?;
        info!(
            "上传合并完成: bucket={}, object={}, size={}",
            details.bucket_key, details.object_key, details.size
        );
        Ok(details)
    }
}

#[async_trait]
impl DownloadUrlProvider for OssClient {
    async fn request_descriptor(
        &self,
        bucket_key: &str,
        object_key: &str,
        minutes_expiration: Option<u32>,
        credential: &str,
    ) -> Result<SignedDownloadDescriptor, ProviderError> {
        let url = self.object_url(bucket_key, object_key, "signeds3download");

        let mut request = self.client.get(&url).bearer_auth(credential);
        if let Some(minutes) = minutes_expiration {
            request = request.query(&[("minutesExpiration", minutes.to_string())]);
        }

        let response = request.send().await?;
        Self::read_json(response).await
    }
}
