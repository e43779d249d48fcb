// 上传凭证签发客户端
//
// 有效期按 "文件大小 / 上行带宽" 估算，加 10% 缓冲。
// 403 之后的重试请求把有效期整体放大 90 倍：403 意味着原窗口严重失准
// （时钟偏差或网络过慢），小幅递增没有意义

use crate::config::IssuerConfig;
use crate::credential::UploadCredential;
use crate::error::UploadError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// 有效期下限：1 秒（空文件也申请一个正数窗口）
const MIN_EXPIRY_MINUTES: f64 = 1.0 / 60.0;

/// 一次签发请求的输入
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRequest {
    pub file_name: String,
    pub size_bytes: u64,
    pub bandwidth_mbps: f64,
    /// 允许使用凭证的公网地址（单地址范围）
    pub allowed_address: String,
    /// 403 后的延长申请
    pub extended: bool,
}

/// 凭证签发
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, request: &IssueRequest) -> Result<UploadCredential, UploadError>;
}

/// 有效期计算参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpiryPolicy {
    /// 缓冲比例，0.10 即 10%
    pub buffer_ratio: f64,
    /// 延长倍数
    pub extended_multiplier: f64,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            buffer_ratio: 0.10,
            extended_multiplier: 90.0,
        }
    }
}

impl ExpiryPolicy {
    pub fn from_config(config: &IssuerConfig) -> Self {
        Self {
            buffer_ratio: config.buffer_ratio,
            extended_multiplier: config.extended_multiplier,
        }
    }

    /// 计算有效期（分钟）
    pub fn expiry_minutes(
        &self,
        size_bytes: u64,
        bandwidth_mbps: f64,
        extended: bool,
    ) -> Result<f64, UploadError> {
        compute_expiry_minutes(
            size_bytes,
            bandwidth_mbps,
            self.buffer_ratio,
            if extended {
                self.extended_multiplier
            } else {
                1.0
            },
        )
    }
}

/// 有效期（分钟）= 大小 / (Mbps × 10^6 / 8) × (1 + buffer) / 60 × multiplier
///
/// 例：10,000,000 字节、5 Mbps → 16s × 1.1 / 60 ≈ 0.293 分钟
pub fn compute_expiry_minutes(
    size_bytes: u64,
    bandwidth_mbps: f64,
    buffer_ratio: f64,
    multiplier: f64,
) -> Result<f64, UploadError> {
    if !(bandwidth_mbps.is_finite() && bandwidth_mbps > 0.0) {
        return Err(UploadError::Issuer(format!(
            "无效的带宽估计: {} Mbps",
            bandwidth_mbps
        )));
    }

    let bytes_per_sec = bandwidth_mbps * 1_000_000.0 / 8.0;
    let transfer_secs = size_bytes as f64 / bytes_per_sec;
    let minutes = (transfer_secs * (1.0 + buffer_ratio) / 60.0).max(MIN_EXPIRY_MINUTES);

    Ok(minutes * multiplier)
}

/// 签发接口请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SasTokenRequest<'a> {
    file_name: &'a str,
    expiry_minutes: f64,
    ip_range: IpRange<'a>,
}

#[derive(Debug, Serialize)]
struct IpRange<'a> {
    start: &'a str,
}

/// 签发接口响应体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SasTokenResponse {
    #[serde(default)]
    sas_url: Option<String>,
}

/// 基于 HTTP 的签发客户端
#[derive(Debug, Clone)]
pub struct HttpCredentialIssuer {
    client: Client,
    endpoint: String,
    policy: ExpiryPolicy,
}

impl HttpCredentialIssuer {
    pub fn new(endpoint: impl Into<String>, policy: ExpiryPolicy, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            policy,
        })
    }

    pub fn from_config(config: &IssuerConfig) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            ExpiryPolicy::from_config(config),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<UploadCredential, UploadError> {
        let expiry_minutes = self.policy.expiry_minutes(
            request.size_bytes,
            request.bandwidth_mbps,
            request.extended,
        )?;

        info!(
            "申请上传凭证: file={}, size={}, bandwidth={}Mbps, expiry={:.3}min, extended={}",
            request.file_name,
            request.size_bytes,
            request.bandwidth_mbps,
            expiry_minutes,
            request.extended
        );

        let body = SasTokenRequest {
            file_name: &request.file_name,
            expiry_minutes,
            ip_range: IpRange {
                start: &request.allowed_address,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("凭证签发请求失败: file={}, 错误: {}", request.file_name, e);
                UploadError::Issuer(format!("签发服务不可达: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(
                "凭证签发失败: file={}, status={}, body={}",
                request.file_name, status, text
            );
            return Err(UploadError::Issuer(format!("签发服务返回状态码 {}", status)));
        }

        let parsed: SasTokenResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Issuer(format!("解析签发响应失败: {}", e)))?;

        match parsed.sas_url.filter(|url| !url.is_empty()) {
            Some(sas_url) => Ok(UploadCredential {
                sas_url,
                expiry_minutes,
                extended: request.extended,
            }),
            None => {
                error!("签发响应缺少 sasUrl: file={}", request.file_name);
                Err(UploadError::Issuer("响应格式无效：缺少 sasUrl".to_string()))
            }
        }
    }
}
