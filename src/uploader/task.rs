// 上传条目定义
//
// 每个被接受的文件对应一个 UploadItem，只由管理器修改：
// 提交/启动/删除由管理器直接写入，上传任务的更新经由聚合任务写入

use crate::error::UploadError;
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// 上传状态
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 等待中
    Pending,
    /// 上传中（含签发凭证、校验阶段）
    Uploading,
    /// 成功（终态）
    Success,
    /// 失败
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "Pending",
            UploadStatus::Uploading => "Uploading",
            UploadStatus::Success => "Success",
            UploadStatus::Failed => "Failed",
        }
    }

    /// 是否可以被 upload_all 再次启动
    pub fn is_startable(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Failed)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分块读取的文件内容，用作 PUT 请求体
pub type ContentStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// 文件内容句柄
#[derive(Debug, Clone)]
pub enum FileContent {
    /// 本地文件，每次尝试重新打开并流式读取
    Path(PathBuf),
    /// 内存中的数据
    Memory(Bytes),
}

impl FileContent {
    /// 当前内容长度（本地文件取元数据）
    pub async fn size(&self) -> Result<u64, UploadError> {
        match self {
            FileContent::Path(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .map_err(|e| UploadError::ContentUnavailable(format!("{:?}: {}", path, e))),
            FileContent::Memory(data) => Ok(data.len() as u64),
        }
    }

    /// 打开内容流，除最后一块外每块恰好 `chunk_size` 字节
    ///
    /// 本地文件不会整体读入内存；内存数据按切片共享，不复制
    pub async fn open(&self, chunk_size: usize) -> Result<ContentStream, UploadError> {
        let chunk_size = chunk_size.max(1);
        match self {
            FileContent::Path(path) => {
                let file = File::open(path)
                    .await
                    .map_err(|e| UploadError::ContentUnavailable(format!("{:?}: {}", path, e)))?;

                let stream = futures::stream::unfold(Some(file), move |state| async move {
                    let mut file = state?;
                    match read_chunk(&mut file, chunk_size).await {
                        Ok(Some(chunk)) => Some((Ok(chunk), Some(file))),
                        Ok(None) => None,
                        // 出错后结束流
                        Err(e) => Some((Err(e), None)),
                    }
                });
                Ok(Box::pin(stream))
            }
            FileContent::Memory(data) => {
                let data = data.clone();
                let len = data.len();
                let stream = futures::stream::iter((0..len).step_by(chunk_size)).map(move |start| {
                    Ok::<_, io::Error>(data.slice(start..(start + chunk_size).min(len)))
                });
                Ok(Box::pin(stream))
            }
        }
    }
}

/// 读满一块，文件结束时返回 None
async fn read_chunk(file: &mut File, chunk_size: usize) -> io::Result<Option<Bytes>> {
    let mut buf = BytesMut::zeroed(chunk_size);
    let mut filled = 0;
    while filled < chunk_size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if filled == 0 {
        return Ok(None);
    }
    buf.truncate(filled);
    Ok(Some(buf.freeze()))
}

/// 待提交的文件
#[derive(Debug, Clone)]
pub struct FileSource {
    /// 稳定标识（与显示名无关）
    pub id: String,
    pub file_name: String,
    pub size: u64,
    pub content: FileContent,
}

impl FileSource {
    /// 从本地路径创建
    ///
    /// 标识取规范化后的绝对路径，同一文件再次提交时标识不变
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .context(format!("无法获取文件元数据: {:?}", path))?;

        if metadata.is_dir() {
            anyhow::bail!("不支持直接上传目录: {:?}", path);
        }

        let canonical = tokio::fs::canonicalize(path)
            .await
            .context(format!("无法解析文件路径: {:?}", path))?;
        let file_name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context(format!("无法获取文件名: {:?}", path))?;

        Ok(Self {
            id: canonical.to_string_lossy().to_string(),
            file_name,
            size: metadata.len(),
            content: FileContent::Path(canonical),
        })
    }

    /// 从内存数据创建，标识由调用方提供
    pub fn from_bytes(id: impl Into<String>, file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            size: data.len() as u64,
            content: FileContent::Memory(Bytes::from(data)),
        }
    }
}

/// 上传条目
#[derive(Debug, Clone, Serialize)]
pub struct UploadItem {
    pub id: String,
    pub file_name: String,
    pub total_size: u64,
    /// 推断出的 Content-Type
    pub content_type: String,
    #[serde(skip)]
    pub content: FileContent,
    pub status: UploadStatus,
    /// 当前尝试已上传字节数
    pub uploaded_size: u64,
    /// 进度百分比 0-100
    pub progress: u8,
    /// 第几次启动（每次 upload_all 启动加 1，0 表示从未启动）
    pub run: u32,
    /// 本次启动内的尝试序号（从 1 开始，0 表示尚未开始）
    pub attempt: u32,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl UploadItem {
    pub fn new(source: FileSource) -> Self {
        let content_type = mime_guess::from_path(&source.file_name)
            .first_or_octet_stream()
            .to_string();

        Self {
            id: source.id,
            file_name: source.file_name,
            total_size: source.size,
            content_type,
            content: source.content,
            status: UploadStatus::Pending,
            uploaded_size: 0,
            progress: 0,
            run: 0,
            attempt: 0,
            error: None,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 标记为上传中，清空上一次失败的痕迹
    ///
    /// 返回新的启动序号，旧启动迟到的更新凭此过滤
    pub fn mark_uploading(&mut self) -> u32 {
        self.run += 1;
        self.status = UploadStatus::Uploading;
        self.error = None;
        self.attempt = 0;
        self.uploaded_size = 0;
        self.progress = 0;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
        self.run
    }

    /// 新的一次尝试：进度从 0 重新开始
    pub fn begin_attempt(&mut self, attempt: u32) {
        if attempt > self.attempt {
            self.attempt = attempt;
            self.uploaded_size = 0;
            self.progress = 0;
        }
    }

    /// 应用进度更新，返回是否产生了变化
    ///
    /// 旧尝试的进度被忽略；同一尝试内只增不减
    pub fn apply_progress(&mut self, attempt: u32, uploaded: u64, total: u64) -> bool {
        if attempt < self.attempt || self.status != UploadStatus::Uploading {
            return false;
        }
        self.begin_attempt(attempt);

        if uploaded <= self.uploaded_size && self.uploaded_size > 0 {
            return false;
        }
        self.uploaded_size = uploaded;
        let percent = percent_of(uploaded, total);
        if percent > self.progress {
            self.progress = percent;
        }
        true
    }

    /// 标记为成功（终态）
    pub fn mark_success(&mut self) {
        self.status = UploadStatus::Success;
        self.uploaded_size = self.total_size;
        self.progress = 100;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为失败；已成功的条目不受影响
    pub fn mark_failed(&mut self, error: String) -> bool {
        if self.status == UploadStatus::Success {
            return false;
        }
        self.status = UploadStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(chrono::Utc::now().timestamp());
        true
    }
}

/// 百分比，四舍五入并限制在 0-100
pub fn percent_of(uploaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (uploaded as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn item(size: usize) -> UploadItem {
        UploadItem::new(FileSource::from_bytes("id-1", "report.pdf", vec![0u8; size]))
    }

    #[test]
    fn test_item_creation() {
        let item = item(1000);
        assert_eq!(item.status, UploadStatus::Pending);
        assert_eq!(item.progress, 0);
        assert_eq!(item.total_size, 1000);
        assert_eq!(item.content_type, "application/pdf");
    }

    #[test]
    fn test_unknown_extension_is_octet_stream() {
        let item = UploadItem::new(FileSource::from_bytes("x", "blob.unknownext", vec![1]));
        assert_eq!(item.content_type, "application/octet-stream");
    }

    #[test]
    fn test_progress_monotonic_within_attempt() {
        let mut item = item(1000);
        item.mark_uploading();

        assert!(item.apply_progress(1, 250, 1000));
        assert_eq!(item.progress, 25);
        assert!(!item.apply_progress(1, 100, 1000));
        assert_eq!(item.progress, 25);
        assert!(item.apply_progress(1, 500, 1000));
        assert_eq!(item.progress, 50);
    }

    #[test]
    fn test_new_attempt_resets_progress_and_stale_updates_ignored() {
        let mut item = item(1000);
        item.mark_uploading();
        item.apply_progress(1, 800, 1000);

        item.begin_attempt(2);
        assert_eq!(item.progress, 0);
        assert!(!item.apply_progress(1, 900, 1000));
        assert!(item.apply_progress(2, 300, 1000));
        assert_eq!(item.progress, 30);
    }

    #[test]
    fn test_success_is_terminal() {
        let mut item = item(10);
        item.mark_uploading();
        item.mark_success();
        assert!(!item.mark_failed("late error".to_string()));
        assert_eq!(item.status, UploadStatus::Success);
        assert_eq!(item.progress, 100);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 0), 100);
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 67);
        assert_eq!(percent_of(5, 3), 100);
    }

    #[tokio::test]
    async fn test_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let source = FileSource::from_path(file.path()).await.unwrap();
        assert_eq!(source.size, 11);
        assert_eq!(
            source.file_name,
            file.path().file_name().unwrap().to_string_lossy()
        );

        // 同一文件两次提交，标识一致
        let again = FileSource::from_path(file.path()).await.unwrap();
        assert_eq!(source.id, again.id);

        let chunks: Vec<Bytes> = source
            .content
            .open(4)
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);
        assert_eq!(chunks.concat(), b"hello world");
        assert_eq!(source.content.size().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_path_content_reopens_per_stream() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[9u8; 10]).unwrap();
        file.flush().unwrap();
        let content = FileContent::Path(file.path().to_path_buf());

        // 每次打开都从头读取，重试时内容完整
        for _ in 0..2 {
            let total: usize = content
                .open(3)
                .await
                .unwrap()
                .map(|c| c.unwrap().len())
                .fold(0, |acc, n| async move { acc + n })
                .await;
            assert_eq!(total, 10);
        }
    }

    #[tokio::test]
    async fn test_memory_content_chunks_share_buffer() {
        let data = Bytes::from(vec![1u8; 10]);
        let content = FileContent::Memory(data.clone());
        let chunks: Vec<Bytes> = content
            .open(4)
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_ptr(), data.as_ptr());
    }

    #[tokio::test]
    async fn test_missing_path_is_content_unavailable() {
        let content = FileContent::Path("/definitely/not/here.bin".into());
        assert!(matches!(
            content.size().await,
            Err(UploadError::ContentUnavailable(_))
        ));
        assert!(matches!(
            content.open(4).await,
            Err(UploadError::ContentUnavailable(_))
        ));
    }

    #[test]
    fn test_relaunch_bumps_run() {
        let mut item = item(100);
        assert_eq!(item.mark_uploading(), 1);
        item.apply_progress(3, 50, 100);
        item.mark_failed("boom".to_string());

        assert_eq!(item.mark_uploading(), 2);
        assert_eq!(item.attempt, 0);
        assert_eq!(item.progress, 0);
    }

    #[tokio::test]
    async fn test_from_path_rejects_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(FileSource::from_path(dir.path()).await.is_err());
    }
}
