use thiserror::Error;

/// # Summary
/// 信号解码错误，属于数据错误：对应的消息被丢弃并记录告警，不阻塞同批次的其他信号。
#[derive(Error, Debug)]
pub enum SignalError {
    /// 负载不是合法的 JSON 或结构不匹配
    #[error("Malformed signal payload: {0}")]
    Malformed(String),
    /// 结构合法但字段取值违反约束
    #[error("Invalid signal {id}: {reason}")]
    Invalid { id: String, reason: String },
}
