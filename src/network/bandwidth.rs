// 上行带宽估计
//
// 优先使用配置中的固定值；否则读取本机网卡协商速率（Linux sysfs）。
// 两者都拿不到时返回 None，由调用方判定失败

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 带宽估计
#[async_trait]
pub trait BandwidthProbe: Send + Sync {
    /// 上行带宽（Mbps），不可用时返回 None
    async fn estimate_mbps(&self) -> Option<f64>;
}

/// 固定带宽
#[derive(Debug, Clone, Copy)]
pub struct FixedBandwidth {
    mbps: f64,
}

impl FixedBandwidth {
    pub fn new(mbps: f64) -> Self {
        Self { mbps }
    }
}

#[async_trait]
impl BandwidthProbe for FixedBandwidth {
    async fn estimate_mbps(&self) -> Option<f64> {
        Some(self.mbps)
    }
}

/// 网卡协商速率
///
/// 用 sysinfo 枚举网卡，读取 `<sysfs_root>/<iface>/speed`，取最快的非回环网卡
#[derive(Debug, Clone)]
pub struct LinkSpeedProbe {
    sysfs_root: PathBuf,
}

impl Default for LinkSpeedProbe {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/net"),
        }
    }
}

impl LinkSpeedProbe {
    pub fn with_sysfs_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: root.into(),
        }
    }
}

#[async_trait]
impl BandwidthProbe for LinkSpeedProbe {
    async fn estimate_mbps(&self) -> Option<f64> {
        let root = self.sysfs_root.clone();
        tokio::task::spawn_blocking(move || {
            let networks = sysinfo::Networks::new_with_refreshed_list();
            let names: Vec<String> = networks.iter().map(|(name, _)| name.clone()).collect();
            fastest_link_mbps(&root, &names)
        })
        .await
        .ok()
        .flatten()
    }
}

/// 在给定网卡中取最大的协商速率
///
/// 回环网卡、未插线（speed 为 -1 或读取失败）的网卡被忽略
pub fn fastest_link_mbps(sysfs_root: &Path, interfaces: &[String]) -> Option<f64> {
    interfaces
        .iter()
        .filter(|name| name.as_str() != "lo")
        .filter_map(|name| {
            let raw = std::fs::read_to_string(sysfs_root.join(name).join("speed")).ok()?;
            let speed: i64 = raw.trim().parse().ok()?;
            debug!("网卡 {} 协商速率: {}", name, speed);
            (speed > 0).then_some(speed as f64)
        })
        .fold(None, |best: Option<f64>, speed| {
            Some(best.map_or(speed, |b| b.max(speed)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_speed(root: &Path, iface: &str, speed: &str) {
        fs::create_dir_all(root.join(iface)).unwrap();
        fs::write(root.join(iface).join("speed"), speed).unwrap();
    }

    #[test]
    fn test_fastest_link_picks_max() {
        let dir = TempDir::new().unwrap();
        write_speed(dir.path(), "eth0", "100\n");
        write_speed(dir.path(), "eth1", "1000\n");
        write_speed(dir.path(), "wlan0", "-1\n");

        let names = vec!["eth0".into(), "eth1".into(), "wlan0".into(), "missing".into()];
        assert_eq!(fastest_link_mbps(dir.path(), &names), Some(1000.0));
    }

    #[test]
    fn test_loopback_and_unplugged_ignored() {
        let dir = TempDir::new().unwrap();
        write_speed(dir.path(), "lo", "10000");
        write_speed(dir.path(), "eth0", "-1");

        let names = vec!["lo".into(), "eth0".into()];
        assert_eq!(fastest_link_mbps(dir.path(), &names), None);
    }

    #[tokio::test]
    async fn test_fixed_bandwidth() {
        assert_eq!(FixedBandwidth::new(7.5).estimate_mbps().await, Some(7.5));
    }

    #[tokio::test]
    async fn test_link_probe_with_empty_root_is_none() {
        let dir = TempDir::new().unwrap();
        let probe = LinkSpeedProbe::with_sysfs_root(dir.path());
        assert_eq!(probe.estimate_mbps().await, None);
    }
}
