use crate::common::SignalId;
use crate::signal::error::SignalError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 置信度上限，信号条目与订阅过滤器共享 0–100 的刻度
pub const MAX_CONFIDENCE: f64 = 100.0;

/// # Summary
/// 信号条目中的方向判断。
///
/// # Invariants
/// - 序列化为大写字符串，反序列化时忽略大小写。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BULLISH" => Ok(Direction::Bullish),
            "BEARISH" => Ok(Direction::Bearish),
            "NEUTRAL" => Ok(Direction::Neutral),
            _ => Err(format!("Unknown Direction: {}", s)),
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Direction> for String {
    fn from(d: Direction) -> Self {
        d.to_string()
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bullish => write!(f, "BULLISH"),
            Direction::Bearish => write!(f, "BEARISH"),
            Direction::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// # Summary
/// 信号中针对单个证券的一条观测。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEntry {
    // 证券代码，匹配时区分大小写
    pub ticker: String,
    pub direction: Direction,
    // 0–100
    pub confidence: f64,
}

/// # Summary
/// 外部监控进程发出的一次市场观测，可以同时覆盖多个证券。
///
/// # Invariants
/// - 由外部生成器创建，本系统只读，从不修改也不持久化。
/// - `signal_type` 是开放的字符串标签，分发层不把它收敛为枚举。
/// - `source` 仅用于诊断，不参与匹配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub emitted_at: DateTime<Utc>,
    pub signal_type: String,
    pub entries: Vec<SignalEntry>,
    #[serde(default)]
    pub source: String,
}

impl Signal {
    /// # Summary
    /// 从流中的原始字节解码并校验一条信号。
    ///
    /// # Logic
    /// 1. 以 JSON 反序列化，失败返回 `SignalError::Malformed`。
    /// 2. 调用 `validate` 检查字段约束。
    ///
    /// # Arguments
    /// * `payload`: 流记录的原始负载。
    ///
    /// # Returns
    /// 合法的信号或 `SignalError`。
    pub fn decode(payload: &[u8]) -> Result<Signal, SignalError> {
        let signal: Signal =
            serde_json::from_slice(payload).map_err(|e| SignalError::Malformed(e.to_string()))?;
        signal.validate()?;
        Ok(signal)
    }

    /// # Summary
    /// 校验信号字段约束。
    ///
    /// # Logic
    /// 1. `id` 与 `signal_type` 不能为空。
    /// 2. 至少包含一个条目。
    /// 3. 每个条目的 `ticker` 非空，`confidence` 为 0–100 的有限数。
    pub fn validate(&self) -> Result<(), SignalError> {
        let invalid = |reason: &str| SignalError::Invalid {
            id: self.id.0.clone(),
            reason: reason.to_string(),
        };

        if self.id.0.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if self.signal_type.is_empty() {
            return Err(invalid("empty signal_type"));
        }
        if self.entries.is_empty() {
            return Err(invalid("no entries"));
        }
        for entry in &self.entries {
            if entry.ticker.is_empty() {
                return Err(invalid("empty ticker"));
            }
            if !entry.confidence.is_finite()
                || entry.confidence < 0.0
                || entry.confidence > MAX_CONFIDENCE
            {
                return Err(invalid(&format!(
                    "confidence {} out of range for {}",
                    entry.confidence, entry.ticker
                )));
            }
        }
        Ok(())
    }
}
