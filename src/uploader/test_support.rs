// 测试用的假实现：记录调用次数，按脚本返回结果

use crate::credential::{CredentialIssuer, IssueRequest, UploadCredential};
use crate::error::UploadError;
use crate::network::{AddressResolver, FixedBandwidth, NetworkProbe};
use crate::uploader::task::FileContent;
use crate::uploader::transport::{BlobTransport, TransferOutcome, TransportProgress};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_ADDRESS: &str = "203.0.113.7";

/// 固定地址，统计调用次数
#[derive(Default)]
pub struct CountingResolver {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl AddressResolver for CountingResolver {
    async fn resolve(&self) -> Result<String, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(UploadError::NetworkUnavailable("offline".to_string()))
        } else {
            Ok(TEST_ADDRESS.to_string())
        }
    }
}

/// 记录每次签发请求；`sip` 默认与 TEST_ADDRESS 一致
pub struct FakeIssuer {
    pub requests: Mutex<Vec<IssueRequest>>,
    pub sip: String,
    pub fail: bool,
}

impl Default for FakeIssuer {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            sip: TEST_ADDRESS.to_string(),
            fail: false,
        }
    }
}

impl FakeIssuer {
    pub fn with_sip(sip: &str) -> Self {
        Self {
            sip: sip.to_string(),
            ..Self::default()
        }
    }

    pub fn issued(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn extended_flags(&self) -> Vec<bool> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.extended)
            .collect()
    }
}

#[async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<UploadCredential, UploadError> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if self.fail {
            return Err(UploadError::Issuer("issuer down".to_string()));
        }
        Ok(UploadCredential {
            sas_url: format!(
                "https://acct.blob.core.windows.net/c/{}?sip={}&sig=attempt{}",
                request.file_name, self.sip, n
            ),
            expiry_minutes: 1.0,
            extended: request.extended,
        })
    }
}

/// 按脚本返回结果的传输层；脚本用完后一律返回 Created
///
/// 每次 PUT 真实读取内容，按 `steps` 分块回报进度，块之间让出执行权。
/// `file_steps` 可按文件名覆盖块数
#[derive(Default)]
pub struct ScriptedTransport {
    pub script: Mutex<VecDeque<Result<TransferOutcome, UploadError>>>,
    pub puts: AtomicUsize,
    pub steps: usize,
    pub file_steps: HashMap<String, usize>,
    pub step_delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransferOutcome, UploadError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn with_steps(mut self, steps: usize, step_delay: Option<Duration>) -> Self {
        self.steps = steps;
        self.step_delay = step_delay;
        self
    }

    pub fn with_file_steps(mut self, file_name: &str, steps: usize) -> Self {
        self.file_steps.insert(file_name.to_string(), steps);
        self
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn steps_for(&self, sas_url: &str) -> usize {
        self.file_steps
            .iter()
            .find(|(name, _)| sas_url.contains(&format!("/{}?", name)))
            .map(|(_, steps)| *steps)
            .unwrap_or(self.steps)
            .max(1)
    }
}

#[async_trait]
impl BlobTransport for ScriptedTransport {
    async fn put(
        &self,
        sas_url: &str,
        content: &FileContent,
        size: u64,
        _content_type: &str,
        progress: TransportProgress,
    ) -> Result<TransferOutcome, UploadError> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        let steps = self.steps_for(sas_url) as u64;
        let chunk_size = size.div_ceil(steps).max(1) as usize;
        let mut stream = content.open(chunk_size).await?;

        let mut sent = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UploadError::Transfer(e.to_string()))?;
            sent += chunk.len() as u64;
            progress(sent, size);
            match self.step_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Ok(TransferOutcome::Created))
    }
}

pub fn probe(resolver: Arc<CountingResolver>) -> NetworkProbe {
    NetworkProbe::new(resolver, Arc::new(FixedBandwidth::new(5.0)))
}
