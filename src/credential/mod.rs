// 上传凭证模块
//
// - `issuer.rs`: 向签发服务申请带 IP 限制、限时的 SAS 上传地址
// - `validator.rs`: 发送数据前校验凭证中的 IP 限制

pub mod issuer;
pub mod validator;

pub use issuer::{
    compute_expiry_minutes, CredentialIssuer, ExpiryPolicy, HttpCredentialIssuer, IssueRequest,
};
pub use validator::{extract_param, validate, SAS_EXPIRY_PARAM, SAS_IP_PARAM};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 上传凭证
///
/// 每个 (文件, 尝试) 一份，不修改，重试时整体替换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadCredential {
    /// 带签名的上传地址
    pub sas_url: String,
    /// 申请时请求的有效期（分钟）
    pub expiry_minutes: f64,
    /// 是否为 403 后申请的延长凭证
    pub extended: bool,
}

impl UploadCredential {
    /// 凭证中嵌入的 IP 限制（`sip` 参数）
    pub fn allowed_address(&self) -> Option<String> {
        extract_param(&self.sas_url, SAS_IP_PARAM)
    }

    /// 凭证中嵌入的过期时间（`se` 参数）
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        extract_param(&self.sas_url, SAS_EXPIRY_PARAM)
            .and_then(|se| DateTime::parse_from_rfc3339(&se).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_accessors() {
        let cred = UploadCredential {
            sas_url: "https://acct.blob.core.windows.net/c/report.pdf?sv=2022-11-02&se=2024-05-01T10%3A30%3A00Z&sip=203.0.113.7&sig=abc".to_string(),
            expiry_minutes: 0.3,
            extended: false,
        };
        assert_eq!(cred.allowed_address().as_deref(), Some("203.0.113.7"));
        let expires = cred.expires_at().unwrap();
        assert_eq!(expires.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }

    #[test]
    fn test_credential_without_params() {
        let cred = UploadCredential {
            sas_url: "https://acct.blob.core.windows.net/c/a.txt".to_string(),
            expiry_minutes: 1.0,
            extended: false,
        };
        assert!(cred.allowed_address().is_none());
        assert!(cred.expires_at().is_none());
    }
}
