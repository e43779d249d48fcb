// 上传错误类型定义
//
// 所有错误都在上传引擎/管理器内部消化，
// 对外只体现为 UploadItem.status = Failed + 错误描述

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 上传错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// 无法获取调用方公网地址或带宽估计（致命，不重试）
    #[error("网络信息不可用: {0}")]
    NetworkUnavailable(String),

    /// 凭证签发接口不可达或响应格式错误
    #[error("凭证签发失败: {0}")]
    Issuer(String),

    /// 凭证中的 IP 限制与本机公网地址不一致（本地预检失败，不重试）
    #[error("IP 不匹配: 期望 {expected}, 凭证中为 {found:?}")]
    AddressMismatch {
        expected: String,
        found: Option<String>,
    },

    /// 远端 403，重试次数已耗尽
    #[error("授权被拒绝，已尝试 {attempts} 次")]
    AuthorizationDenied { attempts: u32 },

    /// 其他传输失败（非 201/403 状态码、超时、连接错误）
    #[error("传输失败: {0}")]
    Transfer(String),

    /// 不允许上传的文件类型（不发起任何网络请求）
    #[error("不允许的文件类型: {0}")]
    DisallowedFileType(String),

    /// 本地文件读取失败
    #[error("无法读取文件内容: {0}")]
    ContentUnavailable(String),
}

/// 错误分类（用于日志和事件）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    NetworkUnavailable,
    Issuer,
    AddressMismatch,
    AuthorizationDenied,
    Transfer,
    DisallowedFileType,
    ContentUnavailable,
}

impl UploadError {
    /// 错误分类
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::NetworkUnavailable(_) => UploadErrorKind::NetworkUnavailable,
            UploadError::Issuer(_) => UploadErrorKind::Issuer,
            UploadError::AddressMismatch { .. } => UploadErrorKind::AddressMismatch,
            UploadError::AuthorizationDenied { .. } => UploadErrorKind::AuthorizationDenied,
            UploadError::Transfer(_) => UploadErrorKind::Transfer,
            UploadError::DisallowedFileType(_) => UploadErrorKind::DisallowedFileType,
            UploadError::ContentUnavailable(_) => UploadErrorKind::ContentUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UploadError::AddressMismatch {
            expected: "1.2.3.4".to_string(),
            found: Some("5.6.7.8".to_string()),
        };
        assert_eq!(err.kind(), UploadErrorKind::AddressMismatch);
        assert!(err.to_string().contains("1.2.3.4"));
        assert!(err.to_string().contains("5.6.7.8"));
    }
}
