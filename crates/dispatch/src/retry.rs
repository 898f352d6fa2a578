use kairos_core::config::RetryConfig;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::warn;

/// 抖动幅度：基准延迟的 ±20%
const JITTER_RATIO: f64 = 0.2;

/// # Summary
/// 有界指数退避策略，闸门查询、出口入队与信号流读取共用。
///
/// # Invariants
/// - `max_attempts` 包含首次尝试，至少为 1。
/// - 第 n 次重试前的基准延迟为 `initial * multiplier^(n-1)`，不超过 `max_delay`。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 不带抖动的策略，便于测试断言精确延迟
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// 第 `retry` 次重试（从 1 开始）前的基准延迟
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// 第 `retry` 次重试前实际等待的时长
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.jitter {
            return base;
        }
        Duration::try_from_secs_f64(base.as_secs_f64() * jitter_factor()).unwrap_or(base)
    }

    /// # Summary
    /// 执行一个可重试的异步操作。
    ///
    /// # Logic
    /// 1. 调用 `op`，成功立即返回。
    /// 2. 失败且 `retryable` 判定可重试、尚有剩余次数时，按退避延迟等待后重试。
    /// 3. 否则返回最后一次的错误。
    ///
    /// # Arguments
    /// * `what` - 操作名，仅用于日志。
    /// * `retryable` - 判断错误是否值得重试。
    /// * `op` - 每次尝试调用一次的操作。
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    let delay = self.delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis(),
                        "{} failed, retrying: {}",
                        what,
                        e
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 0.8–1.2 之间的伪随机系数，取系统时钟的纳秒部分
fn jitter_factor() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let unit = f64::from(nanos % 1_000_001) / 1_000_000.0;
    1.0 - JITTER_RATIO + 2.0 * JITTER_RATIO * unit
}
