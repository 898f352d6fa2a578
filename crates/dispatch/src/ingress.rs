use crate::accumulator::{Batch, BatchAccumulator, FlushReason};
use crate::error::DispatchError;
use crate::metrics::DispatchMetrics;
use crate::retry::RetryPolicy;
use kairos_core::signal::entity::Signal;
use kairos_core::stream::entity::{StreamPosition, StreamRecord, lowest_per_partition};
use kairos_core::stream::error::StreamError;
use kairos_core::stream::port::SignalSource;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

type PollFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<StreamRecord>, StreamError>> + Send + 'a>>;

/// # Summary
/// 批处理例程发回入口的回退请求。
///
/// # Invariants
/// - 只对 `epoch` 仍是入口当前代数的请求生效，过期请求直接忽略。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindRequest {
    pub epoch: u64,
    // 失败批次的放行序号，该批次及之后放行的记录都要重投
    pub seq: u64,
}

/// # Summary
/// 信号入口：单个长期运行的循环，从信号流拉取记录，解码后交给累积器，
/// 把放行的批次送入有界通道。
///
/// # Invariants
/// - 通道满时 `send` 挂起，入口随之停止拉取，不丢弃任何记录。
/// - 进行中的 `poll` 只在回退或关闭时被放弃，其它分支触发时保留到下一轮继续等待。
/// - 关闭时放行未满窗口为 `Shutdown` 批次，随后关闭通道。
pub struct SignalIngress {
    source: Arc<dyn SignalSource>,
    accumulator: BatchAccumulator,
    batches: mpsc::Sender<Batch>,
    rewinds: mpsc::UnboundedReceiver<RewindRequest>,
    shutdown: watch::Receiver<bool>,
    metrics: Arc<DispatchMetrics>,
    backoff: RetryPolicy,
    // 当前代数内已放行、尚未确认处理完的批次：(序号, 每分区最小位置)
    in_flight: VecDeque<(u64, Vec<StreamPosition>)>,
    // 批处理例程处理完的最大序号
    done_seq: Arc<AtomicU64>,
}

impl SignalIngress {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn SignalSource>,
        accumulator: BatchAccumulator,
        batches: mpsc::Sender<Batch>,
        rewinds: mpsc::UnboundedReceiver<RewindRequest>,
        shutdown: watch::Receiver<bool>,
        metrics: Arc<DispatchMetrics>,
        backoff: RetryPolicy,
        done_seq: Arc<AtomicU64>,
    ) -> Self {
        Self {
            source,
            accumulator,
            batches,
            rewinds,
            shutdown,
            metrics,
            backoff,
            in_flight: VecDeque::new(),
            done_seq,
        }
    }

    /// # Summary
    /// 入口主循环，直到收到关闭信号或信号流关闭。
    ///
    /// # Logic
    /// 每一轮在以下事件中等待先发生者：
    /// 1. 关闭信号：放行剩余窗口后退出。
    /// 2. 回退请求：放弃进行中的拉取，回退流位置并进入新代数。
    /// 3. 窗口截止时间：放行 `Deadline` 批次。
    /// 4. 拉取结果：解码并交给累积器，数量达到阈值时放行 `Size` 批次。
    pub async fn run(mut self) -> Result<(), DispatchError> {
        let source = self.source.clone();
        let mut pending: Option<PollFuture<'_>> = None;
        let mut poll_failures: u32 = 0;
        info!("Signal ingress started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let deadline = self.accumulator.deadline();
            let poll = pending.get_or_insert_with(|| source.poll());

            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(request) = self.rewinds.recv() => {
                    pending = None;
                    self.rewind(request).await?;
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(batch) = self.accumulator.poll_deadline(Instant::now()) {
                        self.release(batch).await?;
                    }
                }
                polled = poll.as_mut() => {
                    pending = None;
                    match polled {
                        Ok(Some(record)) => {
                            poll_failures = 0;
                            self.on_record(record).await?;
                        }
                        Ok(None) => poll_failures = 0,
                        Err(StreamError::Closed) => {
                            info!("Signal stream closed");
                            break;
                        }
                        Err(e) => {
                            poll_failures = poll_failures.saturating_add(1);
                            let delay = self.backoff.delay(poll_failures);
                            warn!(failures = poll_failures, delay_ms = delay.as_millis(), "Signal stream poll failed: {}", e);
                            sleep(delay).await;
                        }
                    }
                }
            }
        }

        drop(pending);
        if let Some(batch) = self.accumulator.flush(FlushReason::Shutdown, Instant::now()) {
            self.release(batch).await?;
        }
        info!("Signal ingress stopped");
        Ok(())
    }

    /// 解码一条记录，失败的记录只保留位置
    async fn on_record(&mut self, record: StreamRecord) -> Result<(), DispatchError> {
        self.metrics.record_consumed();
        match Signal::decode(&record.payload) {
            Ok(signal) => {
                debug!(signal_id = %signal.id, signal_type = %signal.signal_type, entries = signal.entries.len(), "Signal received");
                if let Some(batch) = self.accumulator.accept(signal, record.position, Instant::now()) {
                    self.release(batch).await?;
                }
            }
            Err(e) => {
                warn!(partition = record.position.partition, offset = record.position.offset, "Dropping malformed signal: {}", e);
                self.metrics.record_malformed();
                self.accumulator.skip(record.position, Instant::now());
            }
        }
        Ok(())
    }

    /// 把批次送入通道，通道满时在此挂起
    async fn release(&mut self, batch: Batch) -> Result<(), DispatchError> {
        let done = self.done_seq.load(Ordering::Acquire);
        while self.in_flight.front().is_some_and(|(seq, _)| *seq <= done) {
            self.in_flight.pop_front();
        }
        self.in_flight
            .push_back((batch.seq, lowest_per_partition(&batch.positions)));

        debug!(seq = batch.seq, size = batch.len(), reason = %batch.reason, "Batch released");
        self.batches
            .send(batch)
            .await
            .map_err(|_| DispatchError::Task("batch processor stopped".into()))
    }

    /// # Summary
    /// 处理批处理例程的回退请求。
    ///
    /// # Logic
    /// 1. 过期代数的请求忽略。
    /// 2. 汇总失败批次及其后放行的批次、当前窗口的每分区最小位置。
    /// 3. 回退信号流，失败时按退避策略重试，最终失败则停止入口。
    /// 4. 丢弃当前窗口，代数加一。
    async fn rewind(&mut self, request: RewindRequest) -> Result<(), DispatchError> {
        let epoch = self.accumulator.epoch();
        if request.epoch != epoch {
            debug!(request_epoch = request.epoch, epoch, "Ignoring stale rewind request");
            return Ok(());
        }

        let mut positions: Vec<StreamPosition> = self
            .in_flight
            .iter()
            .filter(|(seq, _)| *seq >= request.seq)
            .flat_map(|(_, lowest)| lowest.iter().copied())
            .collect();
        positions.extend_from_slice(self.accumulator.positions());
        let targets = lowest_per_partition(&positions);

        if !targets.is_empty() {
            let source = self.source.clone();
            self.backoff
                .run("Stream rewind", |_| true, || source.rewind(&targets))
                .await
                .inspect_err(|e| error!(?targets, "Stream rewind gave up: {}", e))?;
        }

        self.in_flight.clear();
        self.accumulator.restart(epoch + 1);
        warn!(seq = request.seq, epoch = epoch + 1, ?targets, "Signal stream rewound for redelivery");
        Ok(())
    }
}
