//! # `kairos-core` - 触发分发引擎的领域内核
//!
//! 仅包含实体、端口 (Trait) 与错误定义，不依赖任何具体基础设施。
//! 适配器 crate 实现这里的端口，`kairos-dispatch` 只面向端口编程，
//! 具体实现由 `kairos-app` 在启动时注入。

pub mod cache;
pub mod common;
pub mod config;
pub mod dispatch;
pub mod execution;
pub mod signal;
pub mod store;
pub mod stream;
pub mod subscription;
