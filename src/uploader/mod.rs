// 上传模块
//
// - task: 上传条目与状态
// - transport: 对 SAS 地址的单次 PUT
// - engine: 单个文件的凭证签发/校验/重试流程
// - manager: 批次提交、并发上传、状态聚合、软删除

pub mod engine;
pub mod manager;
pub mod task;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::{
    ProgressCallback, TransferProgress, UploadEngine, UploadJob, UploadReceipt,
    DEFAULT_MAX_ATTEMPTS,
};
pub use manager::{BatchSummary, UploadManager};
pub use task::{percent_of, ContentStream, FileContent, FileSource, UploadItem, UploadStatus};
pub use transport::{BlobTransport, HttpBlobTransport, TransferOutcome, TransportProgress};
