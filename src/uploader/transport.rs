// Blob 传输层
//
// 对 SAS 地址发起单次 PUT，请求体按块从文件流式读取，边读边回报进度

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::uploader::task::FileContent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// 读取块大小，也是进度回报粒度
pub const PROGRESS_CHUNK_SIZE: usize = 64 * 1024;

/// 传输进度回调：(已发送字节, 总字节)
pub type TransportProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 单次 PUT 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 201 Created
    Created,
    /// 403 授权被拒绝，可以换新凭证重试
    Denied,
    /// 其他状态码
    Rejected(u16),
}

impl TransferOutcome {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::CREATED => TransferOutcome::Created,
            StatusCode::FORBIDDEN => TransferOutcome::Denied,
            other => TransferOutcome::Rejected(other.as_u16()),
        }
    }
}

/// Blob 上传
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// 把完整内容 PUT 到 `sas_url`，`size` 作为 Content-Length
    ///
    /// 每次调用重新打开内容。超时和连接错误返回 Err(Transfer)，
    /// 收到响应则返回对应的 TransferOutcome
    async fn put(
        &self,
        sas_url: &str,
        content: &FileContent,
        size: u64,
        content_type: &str,
        progress: TransportProgress,
    ) -> Result<TransferOutcome, UploadError>;
}

/// 基于 reqwest 的传输实现
#[derive(Debug, Clone)]
pub struct HttpBlobTransport {
    client: Client,
    /// 单次尝试超时
    timeout: Duration,
    /// x-ms-blob-type
    blob_type: String,
}

impl HttpBlobTransport {
    pub fn new(timeout: Duration, blob_type: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            timeout,
            blob_type: blob_type.into(),
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Self::new(
            Duration::from_secs(config.transfer_timeout_secs),
            config.blob_type.clone(),
        )
    }
}

#[async_trait]
impl BlobTransport for HttpBlobTransport {
    async fn put(
        &self,
        sas_url: &str,
        content: &FileContent,
        size: u64,
        content_type: &str,
        progress: TransportProgress,
    ) -> Result<TransferOutcome, UploadError> {
        let total = size;

        // 每读出一块就回报一次进度
        let mut sent = 0u64;
        let body_stream = content.open(PROGRESS_CHUNK_SIZE).await?.map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                progress(sent, total);
            }
            chunk
        });

        let response = self
            .client
            .put(sas_url)
            .timeout(self.timeout)
            .header("x-ms-blob-type", &self.blob_type)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(body_stream))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("上传超时（{}s）: {}", self.timeout.as_secs(), e);
                    UploadError::Transfer(format!("上传超时（{}s）", self.timeout.as_secs()))
                } else {
                    error!("上传请求发送失败: {}", e);
                    UploadError::Transfer(format!("上传请求发送失败: {}", e))
                }
            })?;

        let status = response.status();
        debug!("上传响应: status={}, size={}", status, total);

        Ok(TransferOutcome::from_status(status))
    }
}
