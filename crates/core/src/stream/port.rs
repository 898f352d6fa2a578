use crate::stream::entity::{StreamPosition, StreamRecord};
use crate::stream::error::StreamError;
use async_trait::async_trait;

/// # Summary
/// 有序、分区的信号流消费端接口 (Port)。
///
/// # Invariants
/// - 至少一次投递：未提交的记录在重启或回退后会再次出现。
/// - `poll` 只由信号入口 (Ingress) 的单个循环调用。
/// - `commit` 可以从批处理协程调用，必须线程安全。
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// # Summary
    /// 拉取下一条记录。
    ///
    /// # Returns
    /// * `Ok(Some(record))` - 读到一条记录。
    /// * `Ok(None)` - 在实现的轮询超时内没有新记录。
    /// * `Err(StreamError::Closed)` - 流已永久关闭。
    async fn poll(&self) -> Result<Option<StreamRecord>, StreamError>;

    /// # Summary
    /// 提交已处理完成的读位置。
    ///
    /// # Arguments
    /// * `positions` - 每个分区最后一条已处理记录的位置，下次从 `offset + 1` 开始读。
    async fn commit(&self, positions: &[StreamPosition]) -> Result<(), StreamError>;

    /// # Summary
    /// 将读位置回退，使这些位置起的记录被重新投递。
    ///
    /// # Arguments
    /// * `positions` - 每个分区需要重新读取的第一条记录位置。
    async fn rewind(&self, positions: &[StreamPosition]) -> Result<(), StreamError>;
}
