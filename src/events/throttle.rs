//! 进度事件节流器
//!
//! 传输层回调非常频繁（每个数据块一次），按时间间隔过滤，避免事件风暴

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进度事件节流器
///
/// 每个上传任务持有一个实例。间隔为 0 时不节流
#[derive(Debug)]
pub struct ProgressThrottler {
    /// 计时起点
    origin: Instant,
    /// 上次发布时相对起点的纳秒数，`u64::MAX` 表示从未发布
    last_emit_nanos: AtomicU64,
    /// 节流间隔（纳秒）
    interval_nanos: u64,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_emit_nanos: AtomicU64::new(u64::MAX),
            interval_nanos: interval.as_nanos() as u64,
        }
    }

    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 检查是否应该发布事件
    ///
    /// 距上次发布超过间隔时返回 true 并记录本次时间，CAS 失败视为被抢先
    pub fn should_emit(&self) -> bool {
        if self.interval_nanos == 0 {
            return true;
        }

        let now = self.origin.elapsed().as_nanos() as u64;
        let last = self.last_emit_nanos.load(Ordering::Relaxed);

        if last != u64::MAX && now.saturating_sub(last) < self.interval_nanos {
            return false;
        }

        self.last_emit_nanos
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 强制发布（用于 100% 或尝试结束时）
    pub fn force_emit(&self) -> bool {
        let now = self.origin.elapsed().as_nanos() as u64;
        self.last_emit_nanos.store(now, Ordering::Relaxed);
        true
    }

    /// 重置（新的一次尝试开始时调用）
    pub fn reset(&self) {
        self.last_emit_nanos.store(u64::MAX, Ordering::Relaxed);
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttler_basic() {
        let throttler = ProgressThrottler::with_millis(100);

        // 第一次应该发布
        assert!(throttler.should_emit());
        // 立即再次调用，不应该发布
        assert!(!throttler.should_emit());
    }

    #[test]
    fn test_throttler_after_interval() {
        let throttler = ProgressThrottler::with_millis(50);
        assert!(throttler.should_emit());

        thread::sleep(Duration::from_millis(60));
        assert!(throttler.should_emit());
    }

    #[test]
    fn test_zero_interval_never_throttles() {
        let throttler = ProgressThrottler::with_millis(0);
        for _ in 0..10 {
            assert!(throttler.should_emit());
        }
    }

    #[test]
    fn test_force_emit_and_reset() {
        let throttler = ProgressThrottler::with_millis(1000);
        assert!(throttler.should_emit());
        assert!(!throttler.should_emit());
        assert!(throttler.force_emit());
        assert!(!throttler.should_emit());

        throttler.reset();
        assert!(throttler.should_emit());
    }
}
