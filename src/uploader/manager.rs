// 上传管理器
//
// 负责管理一个会话内的所有上传条目：
// - 批次提交（按文件名去重，排除已软删除的标识）
// - 并发上传（每个文件一个 tokio 任务）
// - 状态/进度聚合（上传任务的更新只经由聚合任务写入，避免全局锁）
// - 软删除

use crate::config::{AppConfig, UploadConfig};
use crate::credential::HttpCredentialIssuer;
use crate::error::UploadError;
use crate::events::{ProgressThrottler, UploadEvent};
use crate::network::NetworkProbe;
use crate::uploader::engine::{ProgressCallback, TransferProgress, UploadEngine, UploadJob};
use crate::uploader::task::{FileSource, UploadItem, UploadStatus};
use crate::uploader::transport::HttpBlobTransport;
use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 事件广播缓冲大小
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 上传任务发往聚合任务的更新
#[derive(Debug)]
enum TaskUpdate {
    Progress(TransferProgress),
    Succeeded { attempts: u32 },
    Failed(UploadError),
}

/// 聚合任务的输入
#[derive(Debug)]
enum AggregatorMessage {
    Update {
        task_id: String,
        /// 发出更新的启动序号
        run: u32,
        update: TaskUpdate,
    },
    /// 之前的消息全部处理完后回复
    Flush(oneshot::Sender<()>),
}

/// 条目顺序与软删除记录
#[derive(Debug, Default)]
struct BatchIndex {
    /// 活跃条目，按提交顺序
    order: Vec<String>,
    /// 本会话内软删除过的标识，永不再接受
    removed: HashSet<String>,
}

/// 批次统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub success: usize,
    pub failed: usize,
}

/// 上传管理器
pub struct UploadManager {
    /// 会话 ID，软删除记录只在本会话内有效
    session_id: String,
    engine: Arc<UploadEngine>,
    config: UploadConfig,
    /// 所有活跃条目（task_id -> item），写入只来自提交/启动/聚合任务
    items: Arc<DashMap<String, UploadItem>>,
    index: RwLock<BatchIndex>,
    update_tx: mpsc::UnboundedSender<AggregatorMessage>,
    event_tx: broadcast::Sender<UploadEvent>,
    /// 已启动的上传任务
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl UploadManager {
    /// 创建上传管理器，并启动聚合任务
    ///
    /// 需要在 tokio 运行时内调用
    pub fn new(engine: UploadEngine, config: UploadConfig) -> Self {
        let items = Arc::new(DashMap::new());
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(run_aggregator(items.clone(), update_rx, event_tx.clone()));

        let session_id = Uuid::new_v4().to_string();
        info!(
            "上传管理器已创建: session={}, 最大尝试次数={}, 超时={}s, 禁止扩展名={:?}",
            session_id,
            engine.max_attempts(),
            config.transfer_timeout_secs,
            config.blocked_extensions
        );

        Self {
            session_id,
            engine: Arc::new(engine),
            config,
            items,
            index: RwLock::new(BatchIndex::default()),
            update_tx,
            event_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 按配置组装 HTTP 实现
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let probe = NetworkProbe::from_config(&config.network)?;
        let issuer = Arc::new(HttpCredentialIssuer::from_config(&config.issuer)?);
        let transport = Arc::new(HttpBlobTransport::from_config(&config.upload)?);
        let engine =
            UploadEngine::with_max_attempts(probe, issuer, transport, config.upload.max_attempts);
        Ok(Self::new(engine, config.upload.clone()))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 订阅上传事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    fn publish_event(&self, event: UploadEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.event_tx.send(event);
    }

    /// 提交一批文件
    ///
    /// 以下文件被静默丢弃：
    /// - 标识在本会话中被软删除过
    /// - 标识已在活跃列表中
    /// - 文件名与活跃条目或本批次中更早的文件重名
    ///
    /// # 返回
    /// 本次新接受的条目（状态 Pending，进度 0）
    pub async fn submit_batch(&self, files: Vec<FileSource>) -> Vec<UploadItem> {
        let mut index = self.index.write().await;

        let mut names: HashSet<String> = index
            .order
            .iter()
            .filter_map(|id| self.items.get(id).map(|item| item.file_name.clone()))
            .collect();

        let mut accepted = Vec::new();
        for file in files {
            if index.removed.contains(&file.id) {
                debug!("跳过已删除的文件: id={}, name={}", file.id, file.file_name);
                continue;
            }
            if self.items.contains_key(&file.id) {
                debug!("跳过重复标识: id={}", file.id);
                continue;
            }
            if !names.insert(file.file_name.clone()) {
                debug!("跳过重名文件: {}", file.file_name);
                continue;
            }

            let item = UploadItem::new(file);
            info!(
                "接受上传文件: id={}, name={}, size={}, type={}",
                item.id, item.file_name, item.total_size, item.content_type
            );

            index.order.push(item.id.clone());
            self.items.insert(item.id.clone(), item.clone());
            self.publish_event(UploadEvent::Created {
                task_id: item.id.clone(),
                file_name: item.file_name.clone(),
                total_size: item.total_size,
            });
            accepted.push(item);
        }

        accepted
    }

    /// 启动所有 Pending/Failed 条目的上传，不等待完成
    ///
    /// 禁止的扩展名直接标记失败，不发起任何网络请求
    ///
    /// # 返回
    /// 启动的上传任务数
    pub async fn upload_all(&self) -> usize {
        let ids = self.index.read().await.order.clone();
        let mut started = Vec::new();

        for id in ids {
            let Some(mut item) = self.items.get_mut(&id) else {
                continue;
            };
            if !item.status.is_startable() {
                continue;
            }

            // 事件在持有条目写锁期间发出，与 remove 的 Removed 事件保持先后
            let old_status = item.status;
            if self.config.is_blocked(&item.file_name) {
                let error = UploadError::DisallowedFileType(item.file_name.clone());
                warn!("不允许上传的文件类型: {}", item.file_name);
                item.mark_failed(error.to_string());

                self.publish_status_change(&id, old_status, UploadStatus::Failed);
                self.publish_event(UploadEvent::Failed {
                    task_id: id.clone(),
                    error: error.to_string(),
                    error_kind: error.kind(),
                });
                continue;
            }

            let run = item.mark_uploading();
            let job = UploadJob {
                task_id: item.id.clone(),
                file_name: item.file_name.clone(),
                size: item.total_size,
                content_type: item.content_type.clone(),
                content: item.content.clone(),
            };
            self.publish_status_change(&id, old_status, UploadStatus::Uploading);
            drop(item);

            started.push(self.spawn_upload(job, run));
        }

        let count = started.len();
        if count > 0 {
            info!("已启动 {} 个上传任务", count);
        }
        self.handles.lock().await.extend(started);
        count
    }

    /// 为一个文件启动上传任务
    fn spawn_upload(&self, job: UploadJob, run: u32) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let tx = self.update_tx.clone();
        let throttler = ProgressThrottler::with_millis(self.config.progress_interval_ms);

        tokio::spawn(async move {
            let task_id = job.task_id.clone();

            let progress_tx = tx.clone();
            let progress_id = task_id.clone();
            let on_progress: ProgressCallback = Arc::new(move |p: TransferProgress| {
                // 每次尝试的起点和终点总是发送，中间按间隔节流
                if p.uploaded == 0 {
                    throttler.reset();
                } else if p.uploaded >= p.total {
                    throttler.force_emit();
                } else if !throttler.should_emit() {
                    return;
                }
                let _ = progress_tx.send(AggregatorMessage::Update {
                    task_id: progress_id.clone(),
                    run,
                    update: TaskUpdate::Progress(p),
                });
            });

            let update = match engine.upload(&job, on_progress).await {
                Ok(receipt) => {
                    debug!("[{}] 上传回执: {:?}", job.file_name, receipt);
                    TaskUpdate::Succeeded {
                        attempts: receipt.attempts,
                    }
                }
                Err(e) => {
                    error!("[{}] 上传失败: {}", job.file_name, e);
                    TaskUpdate::Failed(e)
                }
            };

            let _ = tx.send(AggregatorMessage::Update {
                task_id,
                run,
                update,
            });
        })
    }

    fn publish_status_change(&self, task_id: &str, old: UploadStatus, new: UploadStatus) {
        self.publish_event(UploadEvent::StatusChanged {
            task_id: task_id.to_string(),
            old_status: old.to_string(),
            new_status: new.to_string(),
        });
    }

    /// 软删除
    ///
    /// 条目从活跃列表移除，标识在本会话内永久排除；
    /// 已上传到远端的 Blob 不受影响，进行中的传输不会被中断，但其后续更新不再体现
    ///
    /// # 返回
    /// 条目是否在活跃列表中
    pub async fn remove(&self, task_id: &str) -> bool {
        let mut index = self.index.write().await;
        index.removed.insert(task_id.to_string());
        index.order.retain(|id| id != task_id);
        let existed = self.items.remove(task_id).is_some();
        drop(index);

        if existed {
            info!("软删除上传条目: session={}, id={}", self.session_id, task_id);
            self.publish_event(UploadEvent::Removed {
                task_id: task_id.to_string(),
            });
        }
        existed
    }

    /// 等待所有已启动的上传结束，且其结果已写入
    pub async fn wait_all(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("上传任务异常: {}", e);
            }
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self.update_tx.send(AggregatorMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// 获取单个条目
    pub fn get_item(&self, task_id: &str) -> Option<UploadItem> {
        self.items.get(task_id).map(|item| item.clone())
    }

    /// 按提交顺序获取所有活跃条目
    pub async fn items(&self) -> Vec<UploadItem> {
        let index = self.index.read().await;
        index
            .order
            .iter()
            .filter_map(|id| self.get_item(id))
            .collect()
    }

    /// 是否为本会话内软删除过的标识
    pub async fn is_removed(&self, task_id: &str) -> bool {
        self.index.read().await.removed.contains(task_id)
    }

    /// 批次统计
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for item in self.items.iter() {
            summary.total += 1;
            match item.status {
                UploadStatus::Pending => summary.pending += 1,
                UploadStatus::Uploading => summary.uploading += 1,
                UploadStatus::Success => summary.success += 1,
                UploadStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// 聚合任务：唯一消费者，把上传任务的更新写入条目并广播事件
async fn run_aggregator(
    items: Arc<DashMap<String, UploadItem>>,
    mut rx: mpsc::UnboundedReceiver<AggregatorMessage>,
    event_tx: broadcast::Sender<UploadEvent>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            AggregatorMessage::Update {
                task_id,
                run,
                update,
            } => {
                apply_update(&items, &task_id, run, update, &event_tx);
            }
            AggregatorMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("上传聚合任务退出");
}

/// 应用一条更新并广播事件
///
/// 事件在持有条目写锁期间发出，软删除因此总是排在该条目的最后一个事件之后
fn apply_update(
    items: &DashMap<String, UploadItem>,
    task_id: &str,
    run: u32,
    update: TaskUpdate,
    event_tx: &broadcast::Sender<UploadEvent>,
) {
    let Some(mut item) = items.get_mut(task_id) else {
        // 已软删除的条目，丢弃
        debug!("忽略已移除条目的更新: {}", task_id);
        return;
    };
    if item.run != run {
        // 上一次启动迟到的更新（例如超时后仍被读取的请求体）
        debug!("忽略过期启动的更新: {} run={} 当前={}", task_id, run, item.run);
        return;
    }

    let old_status = item.status;
    let events = match update {
        TaskUpdate::Progress(p) => {
            if !item.apply_progress(p.attempt, p.uploaded, p.total) {
                return;
            }
            vec![UploadEvent::Progress {
                task_id: task_id.to_string(),
                attempt: item.attempt,
                uploaded_size: item.uploaded_size,
                total_size: item.total_size,
                progress: item.progress,
            }]
        }
        TaskUpdate::Succeeded { attempts } => {
            if old_status == UploadStatus::Success {
                return;
            }
            item.mark_success();
            vec![
                UploadEvent::StatusChanged {
                    task_id: task_id.to_string(),
                    old_status: old_status.to_string(),
                    new_status: UploadStatus::Success.to_string(),
                },
                UploadEvent::Completed {
                    task_id: task_id.to_string(),
                    completed_at: item.completed_at.unwrap_or_default(),
                    attempts,
                },
            ]
        }
        TaskUpdate::Failed(error) => {
            if !item.mark_failed(error.to_string()) {
                return;
            }
            vec![
                UploadEvent::StatusChanged {
                    task_id: task_id.to_string(),
                    old_status: old_status.to_string(),
                    new_status: UploadStatus::Failed.to_string(),
                },
                UploadEvent::Failed {
                    task_id: task_id.to_string(),
                    error: error.to_string(),
                    error_kind: error.kind(),
                },
            ]
        }
    };

    for event in events {
        let _ = event_tx.send(event);
    }
}
