// 对象存储接口数据类型

use serde::{Deserialize, Serialize};

/// 一批预签名上传链接
///
/// `urls[i]` 对应分片 `first_part_index + i`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlBatch {
    /// 分片上传会话标识（首次请求时由服务端分配）
    #[serde(default)]
    pub upload_key: Option<String>,
    /// 预签名链接，按分片序号排列
    #[serde(default)]
    pub urls: Vec<String>,
    /// 第一个链接对应的分片索引（0 起始，服务端响应中不携带，由客户端回填）
    #[serde(skip)]
    pub first_part_index: u64,
    /// 上传会话过期时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_expiration: Option<String>,
    /// 链接过期时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_expiration: Option<String>,
}

impl SignedUrlBatch {
    /// 该批次覆盖的分片索引区间（左闭右开）
    pub fn part_range(&self) -> std::ops::Range<u64> {
        self.first_part_index..self.first_part_index + self.urls.len() as u64
    }
}

/// 服务端对象合并状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    /// 分片已合并，可以下载
    Complete,
    /// 尚未合并（其余所有状态均视为未就绪）
    #[serde(other)]
    Pending,
}

/// 预签名下载描述
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDownloadDescriptor {
    /// 预签名下载链接（未就绪时服务端可能不返回）
    #[serde(default)]
    pub url: Option<String>,
    /// 对象大小（字节）
    #[serde(default)]
    pub size: u64,
    /// 合并状态
    pub status: ObjectStatus,
    /// 对象 SHA-1（服务端可选返回）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

impl SignedDownloadDescriptor {
    /// 是否可以开始分片下载
    pub fn is_complete(&self) -> bool {
        self.status == ObjectStatus::Complete && self.url.is_some()
    }
}

/// 上传完成后服务端返回的对象描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetails {
    pub bucket_key: String,
    pub object_key: String,
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

/// 完成上传请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompleteUploadBody<'a> {
    pub upload_key: &'a str,
}

/// OAuth2 令牌响应
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// 有效期（秒）
    #[serde(default)]
    pub expires_in: u64,
}
