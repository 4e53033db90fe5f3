use anyhow::Context;
use clap::{Parser, Subcommand};
use oss_transfer::{
    config::{AppConfig, LogConfig},
    logging,
    transfer::LogProgress,
    ClientCredentialsAuth, HttpChunkTransport, OssClient, TransferOrchestrator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 对象存储分片传输工具
#[derive(Debug, Parser)]
#[command(name = "oss-transfer", version)]
struct Cli {
    /// 配置文件路径
    #[arg(long, short, default_value = "config/app.toml", env = "OSS_TRANSFER_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 分片上传本地文件
    Upload {
        bucket: String,
        object: String,
        file: PathBuf,
    },
    /// 分片下载对象到本地文件
    Download {
        bucket: String,
        object: String,
        file: PathBuf,
    },
}

/// 加载日志配置
///
/// 配置文件缺失或解析失败时使用默认配置
async fn load_log_config(path: &Path) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 日志先于其他配置初始化（必须保持 _log_guard 存活）
    let log_config = load_log_config(&cli.config).await;
    let _log_guard = logging::init_logging(&log_config);

    info!("oss-transfer v{} 启动", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(&cli.config)
        .await
        .with_context(|| format!("加载配置失败: {:?}", cli.config))?;
    if !config.oss.has_credentials() {
        anyhow::bail!(
            "缺少客户端凭证：请在 {:?} 的 [oss] 中配置，或设置 OSS_CLIENT_ID / OSS_CLIENT_SECRET",
            cli.config
        );
    }

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("创建 HTTP 客户端失败")?;

    let auth = Arc::new(ClientCredentialsAuth::new(
        client.clone(),
        &config.oss.base_url,
        config.oss.client_id.clone(),
        config.oss.client_secret.clone(),
        config.oss.scopes.clone(),
    ));
    let backend = Arc::new(OssClient::new(client.clone(), config.oss.base_url.clone()));
    let transport = Arc::new(HttpChunkTransport::new(
        client,
        Duration::from_secs(config.transfer.request_timeout_secs),
    ));

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到 Ctrl-C，正在取消传输...");
            ctrl_c_cancel.cancel();
        }
    });

    match cli.command {
        Command::Upload {
            bucket,
            object,
            file,
        } => {
            let orchestrator = TransferOrchestrator::new(
                auth,
                backend,
                transport,
                config.transfer.to_transfer_options(),
            )
            .with_progress(Arc::new(LogProgress::new(format!("上传 {}", object))));

            let details = orchestrator
                .upload_file(&bucket, &object, &file, &cancel)
                .await?;
            info!(
                "✓ 上传完成: {} ({} bytes, id={})",
                details.object_key, details.size, details.object_id
            );
        }
        Command::Download {
            bucket,
            object,
            file,
        } => {
            let orchestrator = TransferOrchestrator::new(
                auth,
                backend,
                transport,
                config.transfer.to_transfer_options(),
            )
            .with_progress(Arc::new(LogProgress::new(format!("下载 {}", object))));

            let size = orchestrator
                .download_to_file(&bucket, &object, &file, &cancel)
                .await?;
            info!("✓ 下载完成: {:?} ({} bytes)", file, size);
        }
    }

    Ok(())
}
