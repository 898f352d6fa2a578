//! # `kairos-stream` - 信号流适配器
//!
//! 为 `SignalSource` 端口提供具体实现：
//! * `jsonl` - 追加写入的 JSON-lines 文件，读位置保存在旁路文件中。
//! * `memory` - 内存日志，用于测试与本地演练。
//! * `kafka` - 基于 rdkafka 的消费组（需要启用 `kafka` 特性）。

pub mod jsonl;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
