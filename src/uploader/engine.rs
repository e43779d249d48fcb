// 上传引擎
//
// 单个文件的上传流程：
// 1. 探测公网地址和带宽（每个文件各自探测一次）
// 2. 申请凭证 → 校验 IP 限制 → PUT
// 3. 遇到 403：消耗一次尝试机会，申请延长有效期的新凭证后重新上传
//
// 403 之外的失败（其他状态码、超时、连接错误）都不重试

use crate::credential::{validate, CredentialIssuer, IssueRequest, UploadCredential};
use crate::error::UploadError;
use crate::network::NetworkProbe;
use crate::uploader::task::FileContent;
use crate::uploader::transport::{BlobTransport, TransferOutcome, TransportProgress};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 默认最大尝试次数（含首次）
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 单个文件的上传阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Issuing,
    Validating,
    Transferring,
    Succeeded,
    Failed,
}

/// 上传进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// 尝试序号，从 1 开始
    pub attempt: u32,
    pub uploaded: u64,
    pub total: u64,
}

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// 一个待上传文件
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub task_id: String,
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
    pub content: FileContent,
}

/// 上传成功的回执
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    /// 实际进行的 PUT 次数
    pub attempts: u32,
    /// 签发的凭证数量
    pub credentials_issued: u32,
    /// 不含签名参数的 Blob 地址
    pub blob_url: String,
}

/// 重试状态，只属于一次上传
#[derive(Debug)]
pub struct RetryState {
    attempts_remaining: u32,
    current: Option<UploadCredential>,
}

impl RetryState {
    pub fn new(budget: u32) -> Self {
        Self {
            attempts_remaining: budget,
            current: None,
        }
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    /// 远端拒绝后消耗一次机会，返回是否还能继续
    pub fn consume(&mut self) -> bool {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining > 0
    }

    /// 当前使用的凭证
    pub fn current(&self) -> Option<&UploadCredential> {
        self.current.as_ref()
    }

    /// 新凭证替换旧凭证
    pub fn replace_credential(&mut self, credential: UploadCredential) -> &UploadCredential {
        self.current.insert(credential)
    }
}

/// 上传引擎
pub struct UploadEngine {
    probe: NetworkProbe,
    issuer: Arc<dyn CredentialIssuer>,
    transport: Arc<dyn BlobTransport>,
    max_attempts: u32,
}

impl UploadEngine {
    pub fn new(
        probe: NetworkProbe,
        issuer: Arc<dyn CredentialIssuer>,
        transport: Arc<dyn BlobTransport>,
    ) -> Self {
        Self::with_max_attempts(probe, issuer, transport, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(
        probe: NetworkProbe,
        issuer: Arc<dyn CredentialIssuer>,
        transport: Arc<dyn BlobTransport>,
        max_attempts: u32,
    ) -> Self {
        Self {
            probe,
            issuer,
            transport,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 执行上传
    pub async fn upload(
        &self,
        job: &UploadJob,
        on_progress: ProgressCallback,
    ) -> Result<UploadReceipt, UploadError> {
        // 只取大小，内容在每次 PUT 时流式读取
        let size = job.content.size().await?;
        if size != job.size {
            warn!(
                "[{}] 文件大小在提交后发生变化: {} -> {}",
                job.file_name, job.size, size
            );
        }
        let network = self.probe.observe().await?;

        info!(
            "[{}] 开始上传: size={}, address={}, bandwidth={}Mbps",
            job.file_name, size, network.observed_address, network.bandwidth_mbps
        );

        let mut request = IssueRequest {
            file_name: job.file_name.clone(),
            size_bytes: size,
            bandwidth_mbps: network.bandwidth_mbps,
            allowed_address: network.observed_address.clone(),
            extended: false,
        };
        let mut retry = RetryState::new(self.max_attempts);
        let mut attempt = 0u32;

        loop {
            trace_phase(job, UploadPhase::Issuing);
            let credential = self.issuer.issue(&request).await.map_err(|e| {
                error!("[{}] 凭证签发失败（第 {} 次尝试）: {}", job.file_name, attempt + 1, e);
                e
            })?;

            trace_phase(job, UploadPhase::Validating);
            let credential = validate(credential, &network.observed_address)?;
            let sas_url = retry.replace_credential(credential).sas_url.clone();

            trace_phase(job, UploadPhase::Transferring);
            attempt += 1;
            on_progress(TransferProgress {
                attempt,
                uploaded: 0,
                total: request.size_bytes,
            });

            let cb = on_progress.clone();
            let transport_progress: TransportProgress = Arc::new(move |uploaded, total| {
                cb(TransferProgress {
                    attempt,
                    uploaded,
                    total,
                })
            });

            let outcome = self
                .transport
                .put(
                    &sas_url,
                    &job.content,
                    size,
                    &job.content_type,
                    transport_progress,
                )
                .await?;

            match outcome {
                TransferOutcome::Created => {
                    trace_phase(job, UploadPhase::Succeeded);
                    info!("[{}] ✓ 上传成功 (第 {} 次尝试)", job.file_name, attempt);
                    return Ok(UploadReceipt {
                        attempts: attempt,
                        credentials_issued: attempt,
                        blob_url: strip_query(&sas_url),
                    });
                }
                TransferOutcome::Denied => {
                    if !retry.consume() {
                        trace_phase(job, UploadPhase::Failed);
                        error!(
                            "[{}] 403 授权被拒绝，已达最大尝试次数 ({}), 最后凭证过期时间: {:?}",
                            job.file_name,
                            self.max_attempts,
                            retry.current().and_then(|c| c.expires_at())
                        );
                        return Err(UploadError::AuthorizationDenied { attempts: attempt });
                    }
                    warn!(
                        "[{}] 403 Forbidden: 申请延长有效期的新凭证后重试 (剩余 {} 次)",
                        job.file_name,
                        retry.attempts_remaining()
                    );
                    request.extended = true;
                }
                TransferOutcome::Rejected(code) => {
                    error!("[{}] 非预期状态码: {}", job.file_name, code);
                    return Err(UploadError::Transfer(format!("非预期状态码: {}", code)));
                }
            }
        }
    }
}

fn trace_phase(job: &UploadJob, phase: UploadPhase) {
    debug!("[{}] task={} 阶段: {:?}", job.file_name, job.task_id, phase);
}

/// 去掉 URL 中的签名参数，用于日志和回执
fn strip_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}
