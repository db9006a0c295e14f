//! 请求间随机冷却。
//!
//! 缓存服务器与 Apple 源站都会对突发请求返回 503，所以每次网络操作之后
//! 都在 `[min, max]` 区间内均匀随机地睡一段时间。

use std::time::Duration;

use rand::Rng;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        if max < min {
            Self { min: max, max: min }
        } else {
            Self { min, max }
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn next_delay(&self) -> Duration {
        if self.max.is_zero() {
            return Duration::ZERO;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    pub fn pause(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        info!(
            target: "pacing",
            "随机等待 {:.2}s，避免请求过于密集",
            delay.as_secs_f64()
        );
        std::thread::sleep(delay);
    }
}
