// SAS Uploader Library
// 基于 SAS 凭证的 Blob 批量上传客户端核心库

// 配置管理模块
pub mod config;

// 错误类型
pub mod error;

// 上传事件
pub mod events;

// 日志系统
pub mod logging;

// 公网地址与带宽探测
pub mod network;

// SAS 凭证签发与校验
pub mod credential;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use config::AppConfig;
pub use credential::{CredentialIssuer, HttpCredentialIssuer, UploadCredential};
pub use error::{UploadError, UploadErrorKind};
pub use events::UploadEvent;
pub use network::{NetworkContext, NetworkProbe};
pub use uploader::{
    BatchSummary, FileSource, UploadEngine, UploadItem, UploadManager, UploadStatus,
};
