use crate::cache::error::CacheError;
use crate::subscription::entity::SubscriptionSnapshot;
use async_trait::async_trait;
use std::sync::Arc;

/// # Summary
/// 订阅缓存接口 (Port)。
///
/// # Invariants
/// - 快照只能由刷新例程整体替换，读者看到的要么是完整的旧快照，要么是完整的新快照。
/// - 刷新失败不得清空缓存。
#[async_trait]
pub trait SubscriptionCache: Send + Sync {
    /// # Summary
    /// 从订阅源重新加载并原子替换快照。
    ///
    /// # Logic
    /// 1. 通过一次查询加载全部有效订阅。
    /// 2. 构建新的不可变快照。
    /// 3. 原子替换快照指针。
    ///
    /// # Returns
    /// 成功返回新快照中的订阅数量；失败返回 `CacheError`，旧快照保持不变。
    async fn refresh(&self) -> Result<usize, CacheError>;

    /// # Summary
    /// 获取当前快照。
    ///
    /// # Returns
    /// 当前快照的共享引用；冷启动时为空快照。
    fn snapshot(&self) -> Arc<SubscriptionSnapshot>;
}
