use crate::accumulator::BatchAccumulator;
use crate::error::DispatchError;
use crate::gate::RunStateGate;
use crate::ingress::SignalIngress;
use crate::metrics::{DispatchMetrics, MetricsSnapshot, run_reporter};
use crate::processor::BatchProcessor;
use crate::retry::RetryPolicy;
use crate::sink::DispatchSink;
use kairos_core::cache::port::SubscriptionCache;
use kairos_core::common::time::{RealTimeProvider, TimeProvider};
use kairos_core::config::AppConfig;
use kairos_core::dispatch::entity::DispatchDecision;
use kairos_core::dispatch::port::TaskQueue;
use kairos_core::execution::port::ExecutionStateStore;
use kairos_core::stream::port::SignalSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{error, info, warn};

/// 分发结论广播通道容量，慢订阅者会丢失最旧的结论
const DECISION_CHANNEL_CAPACITY: usize = 1024;

/// # Summary
/// 分发引擎门面 (Facade)：持有全部端口实现，负责启动后台例程。
///
/// # Logic
/// 由 `kairos-app` 注入具体的适配器，本 crate 只面向端口编程。
pub struct DispatchEngine {
    config: AppConfig,
    cache: Arc<dyn SubscriptionCache>,
    source: Arc<dyn SignalSource>,
    executions: Arc<dyn ExecutionStateStore>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn TimeProvider>,
}

/// # Summary
/// 运行中引擎的句柄。
///
/// # Invariants
/// - `shutdown` 消费句柄，保证只关闭一次。
/// - `closed` 观察到的例程错误暂存在 `failure`，由 `shutdown` 返回。
pub struct DispatchHandle {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<Result<(), DispatchError>>,
    names: HashMap<Id, &'static str>,
    failure: Option<DispatchError>,
    metrics: Arc<DispatchMetrics>,
    decisions: broadcast::Sender<DispatchDecision>,
}

impl DispatchEngine {
    /// # Arguments
    /// * `config` - 已校验的应用配置。
    /// * `cache` - 订阅缓存。
    /// * `source` - 信号流。
    /// * `executions` - 执行状态库。
    /// * `queue` - 任务队列。
    pub fn new(
        config: AppConfig,
        cache: Arc<dyn SubscriptionCache>,
        source: Arc<dyn SignalSource>,
        executions: Arc<dyn ExecutionStateStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            config,
            cache,
            source,
            executions,
            queue,
            clock: Arc::new(RealTimeProvider),
        }
    }

    /// 替换执行请求 `triggered_at` 使用的时钟
    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// # Summary
    /// 启动引擎。
    ///
    /// # Logic
    /// 1. 先做一次缓存刷新，失败则保持冷启动（此时信号匹配不到任何流水线）。
    /// 2. 启动缓存刷新、指标输出、批处理与信号入口四个例程。
    ///
    /// # Returns
    /// 运行中引擎的句柄。
    pub async fn start(self) -> DispatchHandle {
        let metrics = Arc::new(DispatchMetrics::new());
        refresh_once(self.cache.as_ref(), &metrics).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (batch_tx, batch_rx) = mpsc::channel(self.config.batch.channel_capacity.max(1));
        let (rewind_tx, rewind_rx) = mpsc::unbounded_channel();
        let (decision_tx, _) = broadcast::channel(DECISION_CHANNEL_CAPACITY);
        let done_seq = Arc::new(AtomicU64::new(0));

        let gate = RunStateGate::new(self.executions.clone(), RetryPolicy::from(&self.config.gate.retry));
        let sink = DispatchSink::new(
            self.queue.clone(),
            RetryPolicy::from(&self.config.queue.retry),
            self.clock.clone(),
        );
        let processor = BatchProcessor::new(
            self.cache.clone(),
            gate,
            sink,
            self.source.clone(),
            RetryPolicy::from(&self.config.queue.retry),
            metrics.clone(),
            rewind_tx,
            done_seq.clone(),
            decision_tx.clone(),
        );
        let ingress = SignalIngress::new(
            self.source.clone(),
            BatchAccumulator::new(
                self.config.batch.size_threshold,
                Duration::from_millis(self.config.batch.window_ms),
            ),
            batch_tx,
            rewind_rx,
            shutdown_rx.clone(),
            metrics.clone(),
            RetryPolicy::from(&self.config.queue.retry),
            done_seq,
        );

        let reporter_metrics = metrics.clone();
        let report_every = Duration::from_secs(self.config.metrics.report_interval_secs);
        let reporter_shutdown = shutdown_rx.clone();
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        let refresh = tasks.spawn(refresh_loop(
            self.cache.clone(),
            metrics.clone(),
            Duration::from_secs(self.config.cache.refresh_interval_secs),
            shutdown_rx,
        ));
        names.insert(refresh.id(), "cache-refresh");
        let reporter = tasks.spawn(async move {
            run_reporter(reporter_metrics, report_every, reporter_shutdown).await;
            Ok::<(), DispatchError>(())
        });
        names.insert(reporter.id(), "metrics-reporter");
        let processor = tasks.spawn(processor.run(batch_rx));
        names.insert(processor.id(), "batch-processor");
        let ingress = tasks.spawn(ingress.run());
        names.insert(ingress.id(), "signal-ingress");

        info!(
            size_threshold = self.config.batch.size_threshold,
            window_ms = self.config.batch.window_ms,
            refresh_secs = self.config.cache.refresh_interval_secs,
            "Dispatch engine started"
        );
        DispatchHandle {
            shutdown: shutdown_tx,
            tasks,
            names,
            failure: None,
            metrics,
            decisions: decision_tx,
        }
    }
}

impl DispatchHandle {
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 订阅此后产生的分发结论
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchDecision> {
        self.decisions.subscribe()
    }

    /// # Summary
    /// 等待任一后台例程退出，返回其名称。
    ///
    /// # Logic
    /// 1. 任一例程结束即返回；例程的错误（含 panic）记下来，留给 `shutdown` 返回。
    /// 2. 关闭前的正常退出（例如信号流已关闭）不算错误。
    /// 3. 没有可等待的例程时永远挂起。
    ///
    /// # Invariants
    /// - 取消安全，可直接放进 `tokio::select!`。
    pub async fn closed(&mut self) -> &'static str {
        let Some(joined) = self.tasks.join_next_with_id().await else {
            return std::future::pending().await;
        };
        let (name, outcome) = self.settle(joined);
        match outcome {
            Ok(()) => warn!(task = name, "Engine routine stopped before shutdown"),
            Err(e) => {
                error!(task = name, "Engine routine failed: {}", e);
                self.failure.get_or_insert(e);
            }
        }
        name
    }

    /// # Summary
    /// 优雅关闭。
    ///
    /// # Logic
    /// 1. 广播关闭信号：入口停止拉取，放行剩余窗口并关闭批次通道。
    /// 2. 批处理例程处理完剩余批次、提交后退出。
    /// 3. 等待全部例程结束，返回遇到的第一个错误（包括 `closed` 已观察到的）。
    pub async fn shutdown(mut self) -> Result<(), DispatchError> {
        info!("Dispatch engine shutting down");
        if self.shutdown.send(true).is_err() {
            warn!("All engine routines already stopped");
        }

        let mut first_error = self.failure.take();
        while let Some(joined) = self.tasks.join_next_with_id().await {
            let (name, outcome) = self.settle(joined);
            if let Err(e) = outcome {
                error!(task = name, "Engine routine failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        let final_metrics = self.metrics.snapshot();
        info!(
            batches = final_metrics.batches,
            enqueued = final_metrics.enqueued,
            skipped = final_metrics.skipped_running,
            failed = final_metrics.failed,
            "Dispatch engine stopped"
        );
        first_error.map_or(Ok(()), Err)
    }

    /// 把 join 结果还原为（例程名，例程结果）
    fn settle(
        &mut self,
        joined: Result<(Id, Result<(), DispatchError>), JoinError>,
    ) -> (&'static str, Result<(), DispatchError>) {
        match joined {
            Ok((id, outcome)) => (self.names.remove(&id).unwrap_or("unknown"), outcome),
            Err(e) => {
                let name = self.names.remove(&e.id()).unwrap_or("unknown");
                (name, Err(DispatchError::Task(format!("{}: {}", name, e))))
            }
        }
    }
}

/// 刷新一次缓存并记录指标
async fn refresh_once(cache: &dyn SubscriptionCache, metrics: &DispatchMetrics) {
    let started = Instant::now();
    match cache.refresh().await {
        Ok(size) => {
            metrics.record_refresh(Some(size), started.elapsed());
            info!(size, elapsed_ms = started.elapsed().as_millis(), "Subscription cache refreshed");
        }
        Err(e) => {
            metrics.record_refresh(None, started.elapsed());
            if cache.snapshot().is_cold() {
                warn!("Subscription cache still cold: {}", e);
            }
        }
    }
}

/// # Summary
/// 缓存刷新例程：按固定间隔刷新，与信号流量无关。
async fn refresh_loop(
    cache: Arc<dyn SubscriptionCache>,
    metrics: Arc<DispatchMetrics>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), DispatchError> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // 启动时已刷新过一次
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => refresh_once(cache.as_ref(), &metrics).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    Ok(())
}
