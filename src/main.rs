use sas_uploader::{
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    logging, FileSource, UploadEvent, UploadManager,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// 配置文件路径环境变量
const CONFIG_PATH_ENV: &str = "SAS_UPLOADER_CONFIG";

/// 加载日志配置
///
/// 日志系统初始化之前调用，失败时静默返回默认配置
async fn load_log_config(config_path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(config_path).await {
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

/// 把上传事件写入日志
async fn log_events(mut rx: broadcast::Receiver<UploadEvent>) {
    loop {
        match rx.recv().await {
            Ok(UploadEvent::Progress {
                task_id, progress, attempt, ..
            }) => {
                debug!("进度: {} 第{}次 {}%", task_id, attempt, progress);
            }
            Ok(UploadEvent::Completed { task_id, attempts, .. }) => {
                info!("✓ 上传完成: {} (尝试 {} 次)", task_id, attempts);
            }
            Ok(UploadEvent::Failed { task_id, error, .. }) => {
                error!("上传失败: {}: {}", task_id, error);
            }
            Ok(event) => debug!("事件: {} {:?}", event.task_id(), event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("事件消费过慢，丢弃 {} 条", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    // 🔥 先加载日志配置（必须保持 _log_guard 存活）
    let log_config = load_log_config(&config_path).await;
    let _log_guard = logging::init_logging(&log_config);

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("用法: sas-uploader <文件>...");
        eprintln!("配置文件: ${} (默认 {})", CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH);
        std::process::exit(2);
    }

    info!("SAS Uploader v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(&config_path).await;
    let manager = UploadManager::from_config(&config)?;
    let event_logger = tokio::spawn(log_events(manager.subscribe()));

    let mut sources = Vec::with_capacity(paths.len());
    for path in &paths {
        match FileSource::from_path(path).await {
            Ok(source) => sources.push(source),
            Err(e) => warn!("跳过文件 {}: {:#}", path, e),
        }
    }

    let accepted = manager.submit_batch(sources).await;
    info!("本批次接受 {} 个文件", accepted.len());

    manager.upload_all().await;
    manager.wait_all().await;

    let summary = manager.summary();
    info!(
        "上传结束: 共 {} 个, 成功 {}, 失败 {}",
        summary.total, summary.success, summary.failed
    );
    for item in manager.items().await {
        if let Some(err) = &item.error {
            error!("  ✗ {}: {}", item.file_name, err);
        }
    }

    drop(manager);
    let _ = event_logger.await;

    if summary.failed > 0 {
        // exit 不会运行析构，先把日志刷出去
        drop(_log_guard);
        std::process::exit(1);
    }
    Ok(())
}
