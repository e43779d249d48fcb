// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 网络探测配置
    #[serde(default)]
    pub network: NetworkConfig,
    /// 凭证签发配置
    #[serde(default)]
    pub issuer: IssuerConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
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

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 每个文件的最大尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 单次 PUT 超时（秒）
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    /// 禁止上传的扩展名（不区分大小写）
    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,
    /// 进度事件最小间隔（毫秒），0 表示不节流
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// x-ms-blob-type 请求头的取值
    #[serde(default = "default_blob_type")]
    pub blob_type: String,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_transfer_timeout_secs() -> u64 {
    40
}

fn default_blocked_extensions() -> Vec<String> {
    vec![".zip".to_string()]
}

fn default_progress_interval_ms() -> u64 {
    200
}

fn default_blob_type() -> String {
    "BlockBlob".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            blocked_extensions: default_blocked_extensions(),
            progress_interval_ms: default_progress_interval_ms(),
            blob_type: default_blob_type(),
        }
    }
}

impl UploadConfig {
    /// 判断文件名是否命中禁止上传的扩展名
    pub fn is_blocked(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.blocked_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_lowercase()))
    }
}

/// 网络探测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 公网地址查询服务
    #[serde(default = "default_address_service_url")]
    pub address_service_url: String,
    /// 固定上行带宽（Mbps）。设置后不再读取网卡速率
    #[serde(default)]
    pub bandwidth_mbps: Option<f64>,
    /// 地址查询超时（秒）
    #[serde(default = "default_network_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_address_service_url() -> String {
    "https://api.ipify.org?format=json".to_string()
}

fn default_network_timeout_secs() -> u64 {
    10
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address_service_url: default_address_service_url(),
            bandwidth_mbps: None,
            request_timeout_secs: default_network_timeout_secs(),
        }
    }
}

/// 凭证签发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    /// 签发接口地址
    #[serde(default = "default_issuer_endpoint")]
    pub endpoint: String,
    /// 请求超时（秒）
    #[serde(default = "default_issuer_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 有效期缓冲比例（默认 10%）
    #[serde(default = "default_buffer_ratio")]
    pub buffer_ratio: f64,
    /// 403 重试时有效期放大倍数
    #[serde(default = "default_extended_multiplier")]
    pub extended_multiplier: f64,
}

fn default_issuer_endpoint() -> String {
    "http://localhost:8080/blob-storage/generate-sas-token".to_string()
}

fn default_issuer_timeout_secs() -> u64 {
    30
}

fn default_buffer_ratio() -> f64 {
    0.10
}

fn default_extended_multiplier() -> f64 {
    90.0
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_issuer_endpoint(),
            request_timeout_secs: default_issuer_timeout_secs(),
            buffer_ratio: default_buffer_ratio(),
            extended_multiplier: default_extended_multiplier(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置校验失败")?;

        Ok(config)
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_attempts == 0 {
            anyhow::bail!("upload.max_attempts 必须大于 0");
        }
        if self.upload.transfer_timeout_secs == 0 {
            anyhow::bail!("upload.transfer_timeout_secs 必须大于 0");
        }
        if let Some(mbps) = self.network.bandwidth_mbps {
            if !(mbps.is_finite() && mbps > 0.0) {
                anyhow::bail!("network.bandwidth_mbps 必须为正数: {}", mbps);
            }
        }
        if self.issuer.buffer_ratio < 0.0 {
            anyhow::bail!("issuer.buffer_ratio 不能为负数");
        }
        if self.issuer.extended_multiplier < 1.0 {
            anyhow::bail!("issuer.extended_multiplier 不能小于 1");
        }
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 首次启动：写出默认配置，方便用户修改
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}
