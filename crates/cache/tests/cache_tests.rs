use async_trait::async_trait;
use kairos_cache::snapshot::SnapshotCache;
use kairos_core::cache::port::SubscriptionCache;
use kairos_core::common::{OwnerId, PipelineId};
use kairos_core::store::error::StoreError;
use kairos_core::subscription::entity::SubscriptionEntry;
use kairos_core::subscription::port::SubscriptionSource;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 按调用次数轮换两代订阅数据的订阅源
struct AlternatingSource {
    calls: AtomicUsize,
    fail: AtomicBool,
    size: usize,
}

impl AlternatingSource {
    fn new(size: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            size,
        }
    }
}

fn generation(tag: &str, size: usize) -> Vec<SubscriptionEntry> {
    (0..size)
        .map(|i| SubscriptionEntry {
            pipeline_id: PipelineId(format!("{}-{}", tag, i)),
            owner_id: OwnerId(tag.to_string()),
            watched_tickers: HashSet::from(["AAPL".to_string()]),
            filters: vec![],
        })
        .collect()
}

#[async_trait]
impl SubscriptionSource for AlternatingSource {
    async fn load_active(&self) -> Result<Vec<SubscriptionEntry>, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Database("connection refused".into()));
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let tag = if n % 2 == 0 { "gen-a" } else { "gen-b" };
        Ok(generation(tag, self.size))
    }
}

#[tokio::test]
async fn test_cold_cache_is_empty_until_first_refresh() {
    let cache = SnapshotCache::new(Arc::new(AlternatingSource::new(3)));
    assert!(cache.snapshot().is_cold());
    assert!(cache.snapshot().is_empty());

    let size = cache.refresh().await.unwrap();
    assert_eq!(size, 3);
    let snapshot = cache.snapshot();
    assert!(!snapshot.is_cold());
    assert!(snapshot.get(&PipelineId::from("gen-a-0")).is_some());
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let source = Arc::new(AlternatingSource::new(2));
    let cache = SnapshotCache::new(source.clone());
    cache.refresh().await.unwrap();
    let before = cache.snapshot();

    source.fail.store(true, Ordering::SeqCst);
    assert!(cache.refresh().await.is_err());

    let after = cache.snapshot();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_mixed_generations() {
    let cache = Arc::new(SnapshotCache::new(Arc::new(AlternatingSource::new(200))));
    cache.refresh().await.unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        let stop = stop.clone();
        readers.push(tokio::spawn(async move {
            let mut observed = 0usize;
            while !stop.load(Ordering::SeqCst) {
                let snapshot = cache.snapshot();
                let owners: HashSet<String> = snapshot
                    .watchers("AAPL")
                    .map(|e| e.owner_id.0.clone())
                    .collect();
                // 每份快照只能来自同一代数据
                assert_eq!(owners.len(), 1);
                assert_eq!(snapshot.len(), 200);
                observed += 1;
                tokio::task::yield_now().await;
            }
            observed
        }));
    }

    for _ in 0..50 {
        cache.refresh().await.unwrap();
        tokio::task::yield_now().await;
    }
    stop.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
}
