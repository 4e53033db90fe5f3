//! 日志系统
//!
//! 控制台输出 + 可选的文件输出。文件按大小滚动，文件名带进程启动时间，
//! 启动时清理超过保留天数的旧日志。

use crate::config::LogConfig;
use chrono::Local;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
pub const LOG_FILE_PREFIX: &str = "oss-transfer.";

const LOG_FILE_SUFFIX: &str = ".log";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

struct RollingState {
    log_dir: PathBuf,
    /// 进程启动时间（YYYY-MM-DD-HHMMSS）
    started_at: String,
    max_file_size: u64,
    file: Option<File>,
    /// 0 为首个文件，之后依次递增
    index: u32,
    written: u64,
}

impl RollingState {
    fn file_path(&self) -> PathBuf {
        let name = if self.index == 0 {
            format!("{}{}{}", LOG_FILE_PREFIX, self.started_at, LOG_FILE_SUFFIX)
        } else {
            format!(
                "{}{}_{}{}",
                LOG_FILE_PREFIX, self.started_at, self.index, LOG_FILE_SUFFIX
            )
        };
        self.log_dir.join(name)
    }

    fn open(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())?;
        self.file = Some(file);
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件不滚动，单条超大日志也能写入
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_size {
            if let Some(mut file) = self.file.take() {
                file.flush()?;
            }
            self.index += 1;
            self.open()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("日志文件未打开"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

/// 按大小滚动的日志文件写入器
#[derive(Clone)]
pub struct RollingLogFile {
    state: Arc<Mutex<RollingState>>,
}

impl RollingLogFile {
    /// 在 `log_dir` 下创建首个日志文件
    pub fn new(log_dir: impl Into<PathBuf>, max_file_size: u64) -> io::Result<Self> {
        let mut state = RollingState {
            log_dir: log_dir.into(),
            started_at: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            max_file_size,
            file: None,
            index: 0,
            written: 0,
        };
        state.open()?;

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// 当前写入的文件
    pub fn current_path(&self) -> PathBuf {
        self.state.lock().file_path()
    }
}

impl Write for RollingLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 日志守卫，drop 时刷新文件写入线程
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化全局日志
///
/// `RUST_LOG` 优先于配置中的级别。文件输出初始化失败时退回仅控制台输出。
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(true);

    let file_writer = if config.enabled {
        match fs::create_dir_all(&config.log_dir)
            .and_then(|_| RollingLogFile::new(&config.log_dir, config.max_file_size))
        {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!(
                    "创建日志文件失败: {:?}, 错误: {}，仅输出到控制台",
                    config.log_dir, e
                );
                None
            }
        }
    } else {
        None
    };

    let Some(writer) = file_writer else {
        if let Err(e) = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
        {
            eprintln!("日志系统已初始化: {}", e);
        }
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("日志系统已初始化: {}", e);
    }

    info!(
        "日志系统初始化完成: 目录={:?}, 级别={}, 保留天数={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.level,
        config.retention_days,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );
    cleanup_old_logs(&config.log_dir, config.retention_days);

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 删除超过保留天数的日志文件，返回删除数量
///
/// 日期取自文件名；文件名无法解析时按修改时间判断
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let today = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);
    let mut deleted = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.starts_with(LOG_FILE_PREFIX) || !name.ends_with(LOG_FILE_SUFFIX)
        {
            continue;
        }

        let expired = match log_file_date(name) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => modified_before(&entry, retention),
        };
        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                debug!("已删除过期日志: {:?}", path);
            }
            Err(e) => warn!("删除过期日志失败: {:?}, 错误: {}", path, e),
        }
    }

    if deleted > 0 {
        info!("已清理 {} 个过期日志文件", deleted);
    }
    deleted
}

/// `oss-transfer.YYYY-MM-DD-HHMMSS[_N].log` -> `YYYY-MM-DD`
fn log_file_date(name: &str) -> Option<chrono::NaiveDate> {
    let stem = name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    let date = stem.get(..10)?;
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn modified_before(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    entry
        .metadata()
        .and_then(|m| m.modified())
        .map(|modified| {
            let modified: chrono::DateTime<chrono::Utc> = modified.into();
            chrono::Utc::now().signed_duration_since(modified) > retention
        })
        .unwrap_or(false)
}
