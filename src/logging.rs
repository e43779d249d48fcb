//! 日志系统配置
//!
//! 控制台输出 + 可选的文件持久化。文件按启动时间命名、按大小滚动，
//! 启动时清理超过保留天数的旧文件

use crate::config::LogConfig;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "sas-uploader.";

/// 日志时间格式
const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 按大小滚动的日志文件
struct RollingFile {
    log_dir: PathBuf,
    /// 启动时间戳（YYYY-MM-DD-HHMMSS），同一次运行的所有文件共用
    session_stamp: String,
    /// 0 为首个文件，之后每次滚动加 1
    index: u32,
    file: File,
    written: u64,
    max_file_size: u64,
}

impl RollingFile {
    fn open(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let session_stamp = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        let file = Self::open_file(&log_dir, &session_stamp, 0)?;
        Ok(Self {
            log_dir,
            session_stamp,
            index: 0,
            file,
            written: 0,
            max_file_size,
        })
    }

    fn file_path(log_dir: &Path, stamp: &str, index: u32) -> PathBuf {
        if index == 0 {
            log_dir.join(format!("{}{}.log", LOG_FILE_PREFIX, stamp))
        } else {
            log_dir.join(format!("{}{}_{}.log", LOG_FILE_PREFIX, stamp, index))
        }
    }

    fn open_file(log_dir: &Path, stamp: &str, index: u32) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::file_path(log_dir, stamp, index))
    }

    fn write_record(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_size {
            self.file.flush()?;
            self.index += 1;
            self.file = Self::open_file(&self.log_dir, &self.session_stamp, self.index)?;
            self.written = 0;
        }

        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

/// 线程安全的日志文件写入器，交给 tracing-appender 的非阻塞线程使用
#[derive(Clone)]
pub struct LogFileWriter {
    inner: Arc<Mutex<RollingFile>>,
}

impl LogFileWriter {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(log_dir, max_file_size)?)),
        })
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, RollingFile>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "日志文件锁已损坏"))
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.file.flush()
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// # Arguments
/// * `config` - 日志配置
///
/// # Returns
/// * `LogGuard` - 日志守卫，需要保持存活直到程序结束
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_ansi(true);

    let writer = if config.enabled {
        fs::create_dir_all(&config.log_dir)
            .and_then(|_| LogFileWriter::new(config.log_dir.clone(), config.max_file_size))
            .map_err(|e| eprintln!("日志文件初始化失败: {:?}, 回退到仅控制台输出: {}", config.log_dir, e))
            .ok()
    } else {
        None
    };

    let Some(writer) = writer else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);

    // 文件输出层（不带 ANSI 颜色）
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days);
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 清理过期日志文件，返回删除数量
///
/// 文件名中的日期优先，解析不到时退回到修改时间
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let today = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);
    let mut removed = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.starts_with(LOG_FILE_PREFIX) || !name.ends_with(".log") {
            continue;
        }

        let expired = match date_from_filename(name) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => expired_by_mtime(&entry, retention),
        };

        if expired {
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!("已删除过期日志文件: {:?}", path);
                }
                Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
            }
        }
    }

    removed
}

/// 从 `sas-uploader.YYYY-MM-DD-HHMMSS[_N].log` 中提取日期
fn date_from_filename(filename: &str) -> Option<chrono::NaiveDate> {
    let stem = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(".log")?;
    let date_part = stem.get(..10)?;
    chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn expired_by_mtime(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    entry
        .metadata()
        .and_then(|m| m.modified())
        .map(|modified| {
            let modified: chrono::DateTime<chrono::Utc> = modified.into();
            chrono::Utc::now().signed_duration_since(modified) > retention
        })
        .unwrap_or(false)
}
