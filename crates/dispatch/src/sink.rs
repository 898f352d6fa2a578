use crate::retry::RetryPolicy;
use kairos_core::common::time::TimeProvider;
use kairos_core::common::{OwnerId, PipelineId, SignalId};
use kairos_core::dispatch::entity::{DispatchDecision, DispatchOutcome, EnqueueAck, ExecutionRequest};
use kairos_core::dispatch::error::QueueError;
use kairos_core::dispatch::port::TaskQueue;
use std::sync::Arc;
use tracing::{debug, error};

/// # Summary
/// 分发出口：为每个通过闸门的流水线提交一个执行请求。
///
/// # Invariants
/// - 每次调用只构造一个请求，重试时复用同一个 `request_id` 与 `dispatch_key`。
/// - 只有瞬时错误会重试；重试耗尽或永久错误都记为 `Failed`，不会向上抛出。
pub struct DispatchSink {
    queue: Arc<dyn TaskQueue>,
    retry: RetryPolicy,
    clock: Arc<dyn TimeProvider>,
}

impl DispatchSink {
    pub fn new(queue: Arc<dyn TaskQueue>, retry: RetryPolicy, clock: Arc<dyn TimeProvider>) -> Self {
        Self { queue, retry, clock }
    }

    /// # Summary
    /// 提交一个执行请求并给出分发结论。
    ///
    /// # Logic
    /// 1. 请求中的信号 ID 排序去重，生成分发键，`triggered_at` 取自时钟。
    ///    返回的结论保留调用方给出的信号顺序。
    /// 2. 入队，瞬时错误按退避策略重试。
    /// 3. `Accepted` → `Enqueued`；`Duplicate` → `SkippedAlreadyRunning`；错误 → `Failed`。
    ///
    /// # Arguments
    /// * `pipeline_id` - 存活的候选流水线。
    /// * `owner_id` - 取自缓存订阅的所有者。
    /// * `matched_signal_ids` - 触发该流水线的信号。
    pub async fn enqueue(
        &self,
        pipeline_id: &PipelineId,
        owner_id: &OwnerId,
        matched_signal_ids: Vec<SignalId>,
    ) -> DispatchDecision {
        // 请求与分发键使用排序后的副本，结论保持匹配顺序
        let mut sorted_ids = matched_signal_ids.clone();
        sorted_ids.sort();
        sorted_ids.dedup();

        let request = ExecutionRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.clone(),
            owner_id: owner_id.clone(),
            dispatch_key: ExecutionRequest::dispatch_key(pipeline_id, &sorted_ids),
            matched_signal_ids: sorted_ids,
            triggered_at: self.clock.now(),
        };

        let outcome = match self
            .retry
            .run("Enqueue", QueueError::is_transient, || self.queue.enqueue(&request))
            .await
        {
            Ok(EnqueueAck::Accepted) => DispatchOutcome::Enqueued,
            Ok(EnqueueAck::Duplicate) => DispatchOutcome::SkippedAlreadyRunning,
            Err(e) => {
                error!(pipeline_id = %pipeline_id, "Enqueue gave up: {}", e);
                DispatchOutcome::Failed(e.to_string())
            }
        };
        debug!(pipeline_id = %pipeline_id, key = %request.dispatch_key, %outcome, "Dispatch decided");

        DispatchDecision {
            pipeline_id: request.pipeline_id,
            matched_signal_ids,
            outcome,
        }
    }
}
