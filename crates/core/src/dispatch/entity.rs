use crate::common::{OwnerId, PipelineId, SignalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 下发给任务队列的执行请求负载。
///
/// # Invariants
/// - `matched_signal_ids` 去重且升序，作为追溯元数据。
/// - `dispatch_key` 由流水线 ID 与信号 ID 集合确定性生成，重放同一批次得到相同的键，
///   供执行层做最终去重。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub request_id: String,
    pub pipeline_id: PipelineId,
    pub owner_id: OwnerId,
    pub matched_signal_ids: Vec<SignalId>,
    pub triggered_at: DateTime<Utc>,
    pub dispatch_key: String,
}

impl ExecutionRequest {
    /// # Summary
    /// 计算分发键。
    ///
    /// # Logic
    /// 信号 ID 排序去重后以逗号拼接，前缀为流水线 ID。
    pub fn dispatch_key(pipeline_id: &PipelineId, signal_ids: &[SignalId]) -> String {
        let mut ids: Vec<&str> = signal_ids.iter().map(|s| s.0.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        format!("{}:{}", pipeline_id.0, ids.join(","))
    }
}

/// # Summary
/// 任务队列对一次入队的确认结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueAck {
    /// 已接收
    Accepted,
    /// 入队时的比较并设置检查发现该流水线已有非终态执行
    Duplicate,
}

/// # Summary
/// 单个候选流水线在一个批次内的分发结论。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    Enqueued,
    SkippedAlreadyRunning,
    Failed(String), // 重试耗尽后的最后一个错误
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Enqueued => write!(f, "enqueued"),
            DispatchOutcome::SkippedAlreadyRunning => write!(f, "skipped_already_running"),
            DispatchOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// # Summary
/// 分发决策，仅存在于内存中，用于日志、指标与结果汇总，不持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchDecision {
    pub pipeline_id: PipelineId,
    pub matched_signal_ids: Vec<SignalId>,
    pub outcome: DispatchOutcome,
}
