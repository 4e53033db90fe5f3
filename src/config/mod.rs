// 配置管理模块

use crate::oss::storage::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::transfer::types::TransferOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 覆盖 `oss.client_id` 的环境变量
pub const ENV_CLIENT_ID: &str = "OSS_CLIENT_ID";
/// 覆盖 `oss.client_secret` 的环境变量
pub const ENV_CLIENT_SECRET: &str = "OSS_CLIENT_SECRET";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 对象存储服务配置
    #[serde(default)]
    pub oss: OssConfig,
    /// 传输配置
    #[serde(default)]
    pub transfer: TransferConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否写入日志文件
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（RUST_LOG 优先）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 对象存储服务配置
#[derive(Clone, Serialize, Deserialize)]
pub struct OssConfig {
    /// 服务根地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// 申请的权限范围
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_base_url() -> String {
    "https://developer.api.autodesk.com".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "data:read".to_string(),
        "data:write".to_string(),
        "data:create".to_string(),
    ]
}

impl Default for OssConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: default_scopes(),
        }
    }
}

impl std::fmt::Debug for OssConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OssConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl OssConfig {
    /// 用环境变量覆盖客户端凭证
    pub fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var(ENV_CLIENT_ID) {
            self.client_id = id;
        }
        if let Ok(secret) = std::env::var(ENV_CLIENT_SECRET) {
            self.client_secret = secret;
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// 分片大小（MB）
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 最大分片数
    #[serde(default = "default_max_chunk_count")]
    pub max_chunk_count: u64,
    /// 每批请求的上传链接数
    #[serde(default = "default_url_batch_size")]
    pub url_batch_size: u64,
    /// 单个分片最大尝试次数
    #[serde(default = "default_max_retry_per_chunk")]
    pub max_retry_per_chunk: u32,
    /// 单个分片链接过期后的最大刷新次数
    #[serde(default = "default_max_retry_on_url_expiry")]
    pub max_retry_on_url_expiry: u32,
    /// 单次接口调用令牌过期后的最大刷新次数
    #[serde(default = "default_max_retry_on_token_expiry")]
    pub max_retry_on_token_expiry: u32,
    /// 上传并发分片数（1 为顺序上传）
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
    /// 初始退避（毫秒）
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// 最大退避（毫秒）
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// 签名链接有效期（分钟），不填使用服务端默认值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_expiry_minutes: Option<u32>,
    /// 单次分片请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_chunk_size_mb() -> u64 {
    5
}

fn default_max_chunk_count() -> u64 {
    TransferOptions::default().max_chunk_count
}

fn default_url_batch_size() -> u64 {
    TransferOptions::default().url_batch_size
}

fn default_max_retry_per_chunk() -> u32 {
    TransferOptions::default().max_retry_per_chunk
}

fn default_max_retry_on_url_expiry() -> u32 {
    TransferOptions::default().max_retry_on_url_expiry
}

fn default_max_retry_on_token_expiry() -> u32 {
    TransferOptions::default().max_retry_on_token_expiry
}

fn default_max_concurrent_chunks() -> usize {
    TransferOptions::default().max_concurrent_chunks
}

fn default_initial_backoff_ms() -> u64 {
    TransferOptions::default().initial_backoff_ms
}

fn default_max_backoff_ms() -> u64 {
    TransferOptions::default().max_backoff_ms
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
            max_chunk_count: default_max_chunk_count(),
            url_batch_size: default_url_batch_size(),
            max_retry_per_chunk: default_max_retry_per_chunk(),
            max_retry_on_url_expiry: default_max_retry_on_url_expiry(),
            max_retry_on_token_expiry: default_max_retry_on_token_expiry(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            url_expiry_minutes: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TransferConfig {
    /// 转换为引擎参数
    pub fn to_transfer_options(&self) -> TransferOptions {
        TransferOptions {
            chunk_size: self.chunk_size_mb.saturating_mul(1024 * 1024),
            max_chunk_count: self.max_chunk_count,
            url_batch_size: self.url_batch_size,
            max_retry_per_chunk: self.max_retry_per_chunk,
            max_retry_on_url_expiry: self.max_retry_on_url_expiry,
            max_retry_on_token_expiry: self.max_retry_on_token_expiry,
            max_concurrent_chunks: self.max_concurrent_chunks,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            url_expiry_minutes: self.url_expiry_minutes,
        }
    }

    /// 校验参数
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size_mb == 0 {
            return Err("chunk_size_mb 必须大于 0".to_string());
        }
        if self.url_batch_size == 0 {
            return Err("url_batch_size 必须大于 0".to_string());
        }
        if self.max_retry_per_chunk == 0 {
            return Err("max_retry_per_chunk 至少为 1（包含首次尝试）".to_string());
        }
        if self.max_concurrent_chunks == 0 {
            return Err("max_concurrent_chunks 必须大于 0".to_string());
        }
        if self.max_chunk_count == 0 {
            return Err("max_chunk_count 必须大于 0".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "initial_backoff_ms ({}) 不能大于 max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// 从文件加载配置
    ///
    /// 加载后应用环境变量覆盖并校验传输参数
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: AppConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        config.oss.apply_env_overrides();

        config
            .transfer
            .validate()
            .map_err(|e| anyhow::anyhow!("传输配置无效: {}", e))?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.transfer
            .validate()
            .map_err(|e| anyhow::anyhow!("保存配置失败：{}", e))?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {:?}", path);
        Ok(())
    }

    /// 加载配置
    ///
    /// 文件存在时必须能解析并通过校验，否则返回错误；
    /// 文件不存在时使用默认配置并尝试写入默认文件
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load_from_file(path).await?;
            tracing::info!("配置文件加载成功: {:?}", path);
            return Ok(config);
        }

        tracing::warn!("配置文件不存在，使用默认配置: {:?}", path);
        let mut config = Self::default();
        if let Err(e) = config.save_to_file(path).await {
            tracing::error!("保存默认配置失败: {:#}", e);
        }

        config.oss.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.transfer.chunk_size_mb, 5);
        assert_eq!(config.transfer.max_concurrent_chunks, 1);
        assert!(config.log.enabled);
        assert_eq!(config.log.log_dir, PathBuf::from("logs"));
        assert_eq!(config.log.retention_days, 7);
        assert!(config.transfer.validate().is_ok());
    }

    #[test]
    fn test_to_transfer_options_matches_defaults() {
        let options = TransferConfig::default().to_transfer_options();
        assert_eq!(options, TransferOptions::default());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [oss]
            client_id = "abc"

            [transfer]
            chunk_size_mb = 8
            url_expiry_minutes = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.oss.client_id, "abc");
        assert_eq!(config.oss.base_url, default_base_url());
        let options = config.transfer.to_transfer_options();
        assert_eq!(options.chunk_size, 8 * 1024 * 1024);
        assert_eq!(options.url_expiry_minutes, Some(10));
        assert_eq!(options.url_batch_size, 25);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = TransferConfig {
            chunk_size_mb: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.chunk_size_mb = 1;
        config.max_retry_per_chunk = 0;
        assert!(config.validate().is_err());

        config.max_retry_per_chunk = 1;
        config.max_concurrent_chunks = 0;
        assert!(config.validate().is_err());

        config.max_concurrent_chunks = 2;
        config.initial_backoff_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let oss = OssConfig {
            client_secret: "super-secret".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", oss).contains("super-secret"));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("app.toml");

        let mut config = AppConfig::default();
        config.transfer.max_concurrent_chunks = 4;
        config.save_to_file(&path).await.unwrap();

        let loaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.transfer.max_concurrent_chunks, 4);
        assert_eq!(loaded.oss.scopes, default_scopes());
    }

    #[tokio::test]
    async fn test_load_or_default_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");

        let config = AppConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config.transfer.chunk_size_mb, 5);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_load_or_default_reports_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        let content = "[transfer]\nmax_concurrent_chunks = 0\n";
        tokio::fs::write(&path, content).await.unwrap();

        let err = AppConfig::load_or_default(&path).await.unwrap_err();
        assert!(format!("{:#}", err).contains("max_concurrent_chunks"));
        // 原文件保持不变
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_transfer_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        tokio::fs::write(&path, "[transfer]\nurl_batch_size = 0\n")
            .await
            .unwrap();

        assert!(AppConfig::load_from_file(&path).await.is_err());
    }
}
