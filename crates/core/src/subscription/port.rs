use crate::store::error::StoreError;
use crate::subscription::entity::SubscriptionEntry;
use async_trait::async_trait;

/// # Summary
/// 订阅源接口 (Port)，由订阅缓存的刷新例程调用。
///
/// # Invariants
/// - 一次调用对应底层的一次查询。
/// - 只返回 `active = true` 且 `trigger_mode = signal` 的流水线。
/// - 本系统对订阅数据只读。
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// # Summary
    /// 加载全部有效的信号触发订阅。
    ///
    /// # Returns
    /// * `Result<Vec<SubscriptionEntry>, StoreError>`
    async fn load_active(&self) -> Result<Vec<SubscriptionEntry>, StoreError>;
}
