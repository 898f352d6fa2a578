//! # `kairos-dispatch` - 触发分发引擎
//!
//! 把连续的信号流转化为恰当的流水线执行请求：
//!
//! 信号入口 (`ingress`) → 批次累积 (`accumulator`) → 匹配 (`matcher`)
//! → 运行状态闸门 (`gate`) → 分发出口 (`sink`)
//!
//! 批次由 `processor` 顺序处理，处理完成后才提交流位置。
//! `engine` 负责启动与关闭全部后台例程。

pub mod accumulator;
pub mod engine;
pub mod error;
pub mod gate;
pub mod ingress;
pub mod matcher;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod sink;
