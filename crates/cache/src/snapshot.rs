use async_trait::async_trait;
use kairos_core::cache::error::CacheError;
use kairos_core::cache::port::SubscriptionCache;
use kairos_core::common::time::{RealTimeProvider, TimeProvider};
use kairos_core::subscription::entity::SubscriptionSnapshot;
use kairos_core::subscription::port::SubscriptionSource;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// # Summary
/// 基于"整体替换"的订阅缓存实现。
///
/// # Invariants
/// - 快照本身不可变，只有 `current` 中的指针会被替换。
/// - 写锁只在替换指针的瞬间持有，从不跨越 `.await`。
/// - 查询失败时保留旧快照。
pub struct SnapshotCache {
    // 订阅源驱动
    source: Arc<dyn SubscriptionSource>,
    // 当前快照指针
    current: RwLock<Arc<SubscriptionSnapshot>>,
    // 时钟，用于标记快照加载时间
    clock: Arc<dyn TimeProvider>,
}

impl SnapshotCache {
    /// # Summary
    /// 创建一个冷启动的缓存实例。
    ///
    /// # Logic
    /// 以空快照初始化，首次 `refresh` 成功前任何信号都匹配不到流水线。
    ///
    /// # Arguments
    /// * `source`: 订阅源驱动。
    ///
    /// # Returns
    /// * `Self` - 冷启动的缓存。
    pub fn new(source: Arc<dyn SubscriptionSource>) -> Self {
        Self::with_clock(source, Arc::new(RealTimeProvider))
    }

    /// 使用指定时钟创建缓存
    pub fn with_clock(source: Arc<dyn SubscriptionSource>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(SubscriptionSnapshot::cold())),
            clock,
        }
    }

    fn swap(&self, next: Arc<SubscriptionSnapshot>) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }
}

#[async_trait]
impl SubscriptionCache for SnapshotCache {
    /// # Logic
    /// 1. 不持锁地查询订阅源。
    /// 2. 失败则记录告警并返回错误，旧快照不动。
    /// 3. 成功则构建新快照并替换指针。
    async fn refresh(&self) -> Result<usize, CacheError> {
        let entries = match self.source.load_active().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Subscription refresh failed, keeping previous snapshot: {}", e);
                return Err(CacheError::Refresh(e.to_string()));
            }
        };

        let snapshot = Arc::new(SubscriptionSnapshot::new(entries, self.clock.now()));
        let size = snapshot.len();
        self.swap(snapshot);
        debug!(size, "Subscription snapshot swapped");
        Ok(size)
    }

    fn snapshot(&self) -> Arc<SubscriptionSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
