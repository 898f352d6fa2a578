use thiserror::Error;

/// # Summary
/// 下游任务队列的错误。
///
/// # Invariants
/// - 只有 `Unavailable` 属于瞬时故障，允许重试。
#[derive(Error, Debug)]
pub enum QueueError {
    /// 队列不可达或超时
    #[error("Task queue unavailable: {0}")]
    Unavailable(String),
    /// 队列明确拒绝了该请求，重试无意义
    #[error("Task queue rejected request: {0}")]
    Rejected(String),
    /// 请求负载序列化失败
    #[error("Serialize error: {0}")]
    Serialize(String),
}

impl QueueError {
    /// 是否值得在当前批次内重试
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}
