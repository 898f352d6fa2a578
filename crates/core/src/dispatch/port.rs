use crate::dispatch::entity::{EnqueueAck, ExecutionRequest};
use crate::dispatch::error::QueueError;
use async_trait::async_trait;

/// # Summary
/// 下游任务队列接口 (Port)，分发汇 (Dispatch Sink) 通过它提交流水线执行请求。
///
/// # Invariants
/// - 每个存活的候选流水线在每个批次内最多调用一次。
/// - 实现可以在入队时做比较并设置检查，发现已有非终态执行时返回 `EnqueueAck::Duplicate`。
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// # Summary
    /// 提交一个执行请求。
    ///
    /// # Arguments
    /// * `request` - 执行请求负载。
    ///
    /// # Returns
    /// * `Ok(EnqueueAck)` - 队列的确认结果。
    /// * `Err(QueueError)` - 队列不可用或拒绝。
    async fn enqueue(&self, request: &ExecutionRequest) -> Result<EnqueueAck, QueueError>;
}
