use crate::accumulator::Batch;
use crate::error::DispatchError;
use crate::gate::RunStateGate;
use crate::ingress::RewindRequest;
use crate::matcher::match_batch;
use crate::metrics::DispatchMetrics;
use crate::retry::RetryPolicy;
use crate::sink::DispatchSink;
use kairos_core::cache::port::SubscriptionCache;
use kairos_core::common::PipelineId;
use kairos_core::dispatch::entity::{DispatchDecision, DispatchOutcome};
use kairos_core::stream::entity::highest_per_partition;
use kairos_core::stream::error::StreamError;
use kairos_core::stream::port::SignalSource;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// # Summary
/// 一个批次的处理结果。
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    // 闸门之前的候选数
    pub matched: usize,
    pub decisions: Vec<DispatchDecision>,
}

/// # Summary
/// 批处理例程：依次对每个放行的批次执行 匹配 → 闸门 → 出口，完成后提交流位置。
///
/// # Invariants
/// - 批次严格按放行顺序逐个处理，前一个批次提交之前不会开始下一个。
/// - 整个批次使用同一份订阅快照。
/// - 闸门失败或不变量被破坏时不提交，向入口请求回退；代数落后的批次直接丢弃。
/// - 出口失败不影响提交，失败记录在分发结论中。
pub struct BatchProcessor {
    cache: Arc<dyn SubscriptionCache>,
    gate: RunStateGate,
    sink: DispatchSink,
    source: Arc<dyn SignalSource>,
    commit_retry: RetryPolicy,
    metrics: Arc<DispatchMetrics>,
    rewinds: mpsc::UnboundedSender<RewindRequest>,
    done_seq: Arc<AtomicU64>,
    decisions: broadcast::Sender<DispatchDecision>,
}

impl BatchProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<dyn SubscriptionCache>,
        gate: RunStateGate,
        sink: DispatchSink,
        source: Arc<dyn SignalSource>,
        commit_retry: RetryPolicy,
        metrics: Arc<DispatchMetrics>,
        rewinds: mpsc::UnboundedSender<RewindRequest>,
        done_seq: Arc<AtomicU64>,
        decisions: broadcast::Sender<DispatchDecision>,
    ) -> Self {
        Self {
            cache,
            gate,
            sink,
            source,
            commit_retry,
            metrics,
            rewinds,
            done_seq,
            decisions,
        }
    }

    /// # Summary
    /// 消费批次通道直到其关闭（入口退出后），处理完通道中剩余的全部批次。
    pub async fn run(self, mut batches: mpsc::Receiver<Batch>) -> Result<(), DispatchError> {
        let mut min_epoch = 0;
        while let Some(batch) = batches.recv().await {
            if batch.epoch < min_epoch {
                debug!(seq = batch.seq, epoch = batch.epoch, min_epoch, "Discarding batch from before rewind");
                continue;
            }

            match self.process(&batch).await {
                Ok(report) => {
                    self.commit(&batch).await;
                    // 只有处理成功的批次才推进，失败批次的位置要留给入口回退
                    self.done_seq.store(batch.seq, Ordering::Release);
                    self.metrics.record_batch(
                        batch.len(),
                        batch.duplicates,
                        batch.opened_at.elapsed(),
                        report.matched,
                        &report.decisions,
                    );
                    for decision in report.decisions {
                        // 没有订阅者时发送失败，忽略即可
                        if self.decisions.send(decision).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    match &e {
                        DispatchError::Invariant(_) => {
                            error!(seq = batch.seq, "Batch aborted on invariant violation: {}", e)
                        }
                        _ => warn!(seq = batch.seq, "Batch aborted, requesting redelivery: {}", e),
                    }
                    self.metrics.record_aborted();
                    min_epoch = batch.epoch + 1;
                    let request = RewindRequest {
                        epoch: batch.epoch,
                        seq: batch.seq,
                    };
                    if self.rewinds.send(request).is_err() {
                        warn!("Ingress already stopped, batch will be redelivered after restart");
                    }
                }
            }
        }
        info!("Batch processor drained");
        Ok(())
    }

    /// # Summary
    /// 处理单个批次，不提交流位置。
    ///
    /// # Logic
    /// 1. 取一次订阅快照，匹配得到候选。
    /// 2. 闸门一次批量查询剔除已在运行的候选，失败则整批中止。
    /// 3. 对每个存活者调用出口；被闸门剔除的记为 `SkippedAlreadyRunning`。
    ///
    /// # Returns
    /// 批次报告；闸门失败返回 `DispatchError::Store`，快照不一致返回 `DispatchError::Invariant`。
    pub async fn process(&self, batch: &Batch) -> Result<BatchReport, DispatchError> {
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let snapshot = self.cache.snapshot();
        if snapshot.is_cold() {
            warn!(signals = batch.len(), "Subscription cache is cold, batch matches nothing");
        }
        let matched = match_batch(&batch.signals, &snapshot);
        let candidates: BTreeSet<PipelineId> = matched.keys().cloned().collect();
        let runnable = self.gate.filter_runnable(&candidates).await?;

        let mut decisions = Vec::with_capacity(matched.len());
        for (pipeline_id, signal_ids) in matched {
            if !runnable.contains(&pipeline_id) {
                decisions.push(DispatchDecision {
                    pipeline_id,
                    matched_signal_ids: signal_ids,
                    outcome: DispatchOutcome::SkippedAlreadyRunning,
                });
                continue;
            }
            let subscription = snapshot.get(&pipeline_id).ok_or_else(|| {
                DispatchError::Invariant(format!(
                    "matched pipeline {} missing from its own snapshot",
                    pipeline_id
                ))
            })?;
            decisions.push(
                self.sink
                    .enqueue(&pipeline_id, &subscription.owner_id, signal_ids)
                    .await,
            );
        }

        let count = |want: fn(&DispatchOutcome) -> bool| {
            decisions.iter().filter(|d| want(&d.outcome)).count()
        };
        info!(
            seq = batch.seq,
            reason = %batch.reason,
            signals = batch.len(),
            candidates = candidates.len(),
            enqueued = count(|o| matches!(o, DispatchOutcome::Enqueued)),
            skipped = count(|o| matches!(o, DispatchOutcome::SkippedAlreadyRunning)),
            failed = count(|o| matches!(o, DispatchOutcome::Failed(_))),
            "Batch dispatched"
        );

        Ok(BatchReport {
            matched: candidates.len(),
            decisions,
        })
    }

    /// 提交批次中每个分区的最大位置，失败只记录日志，记录会在重启后重投
    async fn commit(&self, batch: &Batch) {
        let positions = highest_per_partition(&batch.positions);
        if positions.is_empty() {
            return;
        }
        let source = self.source.clone();
        if let Err(e) = self
            .commit_retry
            .run(
                "Stream commit",
                |e| matches!(e, StreamError::Commit(_) | StreamError::Unavailable(_)),
                || source.commit(&positions),
            )
            .await
        {
            error!(seq = batch.seq, ?positions, "Failed to commit stream position: {}", e);
        }
    }
}
