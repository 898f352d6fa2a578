use kairos_core::dispatch::entity::{DispatchDecision, DispatchOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// 批次大小分布的桶上界，最后一个桶收纳超过 50 的批次
pub const BATCH_SIZE_BOUNDS: [usize; 5] = [1, 5, 10, 20, 50];

const BUCKETS: usize = BATCH_SIZE_BOUNDS.len() + 1;

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// # Summary
/// 分发引擎的运行指标，全部为无锁原子计数器。
///
/// # Invariants
/// - 只增不减（`cache_size` 与 `last_refresh_ms` 为最新值）。
/// - 各后台例程通过共享的 `Arc<DispatchMetrics>` 并发写入。
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    signals_consumed: AtomicU64,
    signals_malformed: AtomicU64,
    signals_duplicate: AtomicU64,
    pipelines_matched: AtomicU64,
    enqueued: AtomicU64,
    skipped_running: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    batches_aborted: AtomicU64,
    batch_size_buckets: [AtomicU64; BUCKETS],
    batch_latency_total_us: AtomicU64,
    batch_latency_max_us: AtomicU64,
    cache_size: AtomicU64,
    last_refresh_ms: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

/// 某一时刻的指标快照，可序列化后输出
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub signals_consumed: u64,
    pub signals_malformed: u64,
    pub signals_duplicate: u64,
    pub pipelines_matched: u64,
    pub enqueued: u64,
    pub skipped_running: u64,
    pub failed: u64,
    pub batches: u64,
    pub batches_aborted: u64,
    // 与 `BATCH_SIZE_BOUNDS` 对应，末尾为 +inf 桶
    pub batch_size_buckets: [u64; BUCKETS],
    pub batch_latency_avg_us: u64,
    pub batch_latency_max_us: u64,
    pub cache_size: u64,
    pub last_refresh_ms: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从流中读到一条记录
    pub fn record_consumed(&self) {
        self.signals_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.signals_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// # Summary
    /// 记录一个处理完成的批次。
    ///
    /// # Arguments
    /// * `size` - 批次内去重后的信号数。
    /// * `duplicates` - 窗口内被忽略的重复信号数。
    /// * `latency` - 自开窗到处理完成的耗时。
    /// * `decisions` - 本批次全部分发结论。
    /// * `matched` - 匹配到的候选流水线数（闸门之前）。
    pub fn record_batch(
        &self,
        size: usize,
        duplicates: usize,
        latency: Duration,
        matched: usize,
        decisions: &[DispatchDecision],
    ) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.signals_duplicate.fetch_add(to_u64(duplicates), Ordering::Relaxed);
        self.pipelines_matched.fetch_add(to_u64(matched), Ordering::Relaxed);

        let bucket = BATCH_SIZE_BOUNDS
            .iter()
            .position(|bound| size <= *bound)
            .unwrap_or(BATCH_SIZE_BOUNDS.len());
        if let Some(counter) = self.batch_size_buckets.get(bucket) {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let us = micros(latency);
        self.batch_latency_total_us.fetch_add(us, Ordering::Relaxed);
        self.batch_latency_max_us.fetch_max(us, Ordering::Relaxed);

        for decision in decisions {
            let counter = match decision.outcome {
                DispatchOutcome::Enqueued => &self.enqueued,
                DispatchOutcome::SkippedAlreadyRunning => &self.skipped_running,
                DispatchOutcome::Failed(_) => &self.failed,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_aborted(&self) {
        self.batches_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次缓存刷新，`size` 为 `None` 表示失败
    pub fn record_refresh(&self, size: Option<usize>, duration: Duration) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        self.last_refresh_ms.store(
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        match size {
            Some(size) => self.cache_size.store(to_u64(size), Ordering::Relaxed),
            None => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let batches = load(&self.batches);
        MetricsSnapshot {
            signals_consumed: load(&self.signals_consumed),
            signals_malformed: load(&self.signals_malformed),
            signals_duplicate: load(&self.signals_duplicate),
            pipelines_matched: load(&self.pipelines_matched),
            enqueued: load(&self.enqueued),
            skipped_running: load(&self.skipped_running),
            failed: load(&self.failed),
            batches,
            batches_aborted: load(&self.batches_aborted),
            batch_size_buckets: std::array::from_fn(|i| {
                self.batch_size_buckets.get(i).map(load).unwrap_or(0)
            }),
            batch_latency_avg_us: load(&self.batch_latency_total_us)
                .checked_div(batches)
                .unwrap_or(0),
            batch_latency_max_us: load(&self.batch_latency_max_us),
            cache_size: load(&self.cache_size),
            last_refresh_ms: load(&self.last_refresh_ms),
            refreshes: load(&self.refreshes),
            refresh_failures: load(&self.refresh_failures),
        }
    }
}

/// # Summary
/// 周期性地把指标快照写入日志，直到收到关闭信号。
///
/// # Arguments
/// * `metrics` - 共享指标。
/// * `every` - 输出间隔。
/// * `shutdown` - 关闭信号，值变为 `true` 时退出并输出最后一次快照。
pub async fn run_reporter(
    metrics: Arc<DispatchMetrics>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    // 第一次 tick 立即返回，跳过
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&metrics),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    report(&metrics);
                    break;
                }
            }
        }
    }
}

fn report(metrics: &DispatchMetrics) {
    match serde_json::to_string(&metrics.snapshot()) {
        Ok(json) => info!(metrics = %json, "Dispatch metrics"),
        Err(e) => warn!("Failed to serialize metrics: {}", e),
    }
}
