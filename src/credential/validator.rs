// 凭证 IP 限制校验
//
// 在本地提前失败，避免把注定被拒绝的数据发出去。
// 这里不重试；重试只发生在远端拒绝（403）之后

use crate::credential::UploadCredential;
use crate::error::UploadError;
use reqwest::Url;
use tracing::{debug, warn};

/// SAS 地址中的 IP 限制参数
pub const SAS_IP_PARAM: &str = "sip";

/// SAS 地址中的过期时间参数
pub const SAS_EXPIRY_PARAM: &str = "se";

/// 读取 URL 查询参数（已解码），URL 无法解析或参数不存在时返回 None
pub fn extract_param(url: &str, name: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// 校验凭证的 IP 限制与本机公网地址逐字节相等
pub fn validate(
    credential: UploadCredential,
    allowed_address: &str,
) -> Result<UploadCredential, UploadError> {
    match credential.allowed_address() {
        Some(sip) if sip == allowed_address => {
            debug!("凭证 IP 校验通过: {}", sip);
            Ok(credential)
        }
        found => {
            warn!(
                "凭证 IP 与本机地址不一致，禁止从其他网络上传: expected={}, found={:?}",
                allowed_address, found
            );
            Err(UploadError::AddressMismatch {
                expected: allowed_address.to_string(),
                found,
            })
        }
    }
}
