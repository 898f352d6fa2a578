use kairos_core::cache::error::CacheError;
use kairos_core::dispatch::error::QueueError;
use kairos_core::store::error::StoreError;
use kairos_core::stream::error::StreamError;
use thiserror::Error;

/// # Summary
/// 分发引擎内部错误。
///
/// # Invariants
/// - `Invariant` 表示逻辑不变量被破坏，对当前批次是致命的，需要运维介入。
/// - 其余变体都是基础设施错误，由各自的调用点决定是否重试。
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Invariant violated: {0}")]
    Invariant(String),
    // 后台任务异常退出
    #[error("Task failed: {0}")]
    Task(String),
}
