// 公网地址查询

use crate::config::NetworkConfig;
use crate::error::UploadError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

/// 公网地址解析
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// 返回调用方公网地址
    async fn resolve(&self) -> Result<String, UploadError>;
}

/// 地址服务响应，形如 `{"ip": "203.0.113.7"}`
#[derive(Debug, Deserialize)]
struct AddressResponse {
    #[serde(default)]
    ip: Option<String>,
}

/// 基于 HTTP 地址服务（默认 ipify）的解析器
#[derive(Debug, Clone)]
pub struct HttpAddressResolver {
    client: Client,
    url: String,
}

impl HttpAddressResolver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        Self::new(
            config.address_service_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl AddressResolver for HttpAddressResolver {
    async fn resolve(&self) -> Result<String, UploadError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            error!("公网地址查询失败: url={}, 错误: {}", self.url, e);
            UploadError::NetworkUnavailable(format!("地址服务不可达: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("公网地址查询失败: url={}, status={}", self.url, status);
            return Err(UploadError::NetworkUnavailable(format!(
                "地址服务返回状态码 {}",
                status
            )));
        }

        let body: AddressResponse = response.json().await.map_err(|e| {
            UploadError::NetworkUnavailable(format!("解析地址服务响应失败: {}", e))
        })?;

        match body.ip.map(|ip| ip.trim().to_string()) {
            Some(ip) if !ip.is_empty() => {
                debug!("公网地址: {}", ip);
                Ok(ip)
            }
            _ => Err(UploadError::NetworkUnavailable(
                "地址服务响应缺少 ip 字段".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn resolver_for(server: &MockServer) -> HttpAddressResolver {
        HttpAddressResolver::new(format!("{}/ip", server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ip": "198.51.100.4"})),
            )
            .mount(&server)
            .await;

        let ip = resolver_for(&server).await.resolve().await.unwrap();
        assert_eq!(ip, "198.51.100.4");
    }

    #[tokio::test]
    async fn test_missing_field_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = resolver_for(&server).await.resolve().await.unwrap_err();
        assert!(matches!(err, UploadError::NetworkUnavailable(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = resolver_for(&server).await.resolve().await.unwrap_err();
        assert!(matches!(err, UploadError::NetworkUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        // 端口 9 (discard) 上通常没有 HTTP 服务
        let resolver =
            HttpAddressResolver::new("http://127.0.0.1:9/ip", Duration::from_secs(2)).unwrap();
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, UploadError::NetworkUnavailable(_)));
    }
}
