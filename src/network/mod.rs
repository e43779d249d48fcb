// 网络信息探测模块
//
// 上传前需要两项输入：
// - 调用方公网地址（凭证的 IP 限制）
// - 上行带宽估计（凭证有效期计算）

pub mod address;
pub mod bandwidth;

pub use address::{AddressResolver, HttpAddressResolver};
pub use bandwidth::{BandwidthProbe, FixedBandwidth, LinkSpeedProbe};

use crate::config::NetworkConfig;
use crate::error::UploadError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// 一次探测得到的网络上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkContext {
    /// 公网地址
    pub observed_address: String,
    /// 上行带宽估计（Mbps）
    pub bandwidth_mbps: f64,
}

/// 网络信息探测器
#[derive(Clone)]
pub struct NetworkProbe {
    resolver: Arc<dyn AddressResolver>,
    bandwidth: Arc<dyn BandwidthProbe>,
}

impl NetworkProbe {
    pub fn new(resolver: Arc<dyn AddressResolver>, bandwidth: Arc<dyn BandwidthProbe>) -> Self {
        Self {
            resolver,
            bandwidth,
        }
    }

    /// 按配置创建：配置了固定带宽时不读取网卡
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        let resolver = Arc::new(HttpAddressResolver::from_config(config)?);
        let bandwidth: Arc<dyn BandwidthProbe> = match config.bandwidth_mbps {
            Some(mbps) => Arc::new(FixedBandwidth::new(mbps)),
            None => Arc::new(LinkSpeedProbe::default()),
        };
        Ok(Self::new(resolver, bandwidth))
    }

    /// 探测公网地址和带宽
    ///
    /// 任一项不可用都返回 NetworkUnavailable，不猜测带宽
    pub async fn observe(&self) -> Result<NetworkContext, UploadError> {
        let observed_address = self.resolver.resolve().await?;

        let bandwidth_mbps = match self.bandwidth.estimate_mbps().await {
            Some(mbps) if mbps.is_finite() && mbps > 0.0 => mbps,
            other => {
                warn!("无法获取上行带宽估计: {:?}", other);
                return Err(UploadError::NetworkUnavailable(
                    "无法获取上行带宽估计".to_string(),
                ));
            }
        };

        debug!(
            "网络探测完成: address={}, bandwidth={}Mbps",
            observed_address, bandwidth_mbps
        );

        Ok(NetworkContext {
            observed_address,
            bandwidth_mbps,
        })
    }
}
