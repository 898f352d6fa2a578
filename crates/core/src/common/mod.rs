use serde::{Deserialize, Serialize};

pub mod time;

/// # Summary
/// 流水线 (Pipeline) 的系统内唯一标识，是订阅缓存与分发决策的主键。
///
/// # Invariants
/// - 在订阅源中全局唯一。
/// - 比较区分大小写，不做任何规范化。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub String);

/// # Summary
/// 信号的唯一标识，由外部信号生成器在发射时分配。
/// 用于追溯 (provenance) 以及识别被重复投递的事件。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub String);

/// # Summary
/// 流水线所有者的用户标识，随执行请求一起下发给任务队列作为鉴权上下文。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PipelineId {
    fn from(s: &str) -> Self {
        PipelineId(s.to_string())
    }
}

impl From<&str> for SignalId {
    fn from(s: &str) -> Self {
        SignalId(s.to_string())
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        OwnerId(s.to_string())
    }
}
