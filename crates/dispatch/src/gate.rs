use crate::retry::RetryPolicy;
use kairos_core::common::PipelineId;
use kairos_core::execution::port::ExecutionStateStore;
use kairos_core::store::error::StoreError;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

/// # Summary
/// 运行状态闸门：剔除已有非终态执行的候选流水线。
///
/// # Invariants
/// - 每个批次只发出一次批量查询（失败重试除外），与候选数量无关。
/// - 查询最终失败时整个批次中止，由调用方保证不提交流位置。
pub struct RunStateGate {
    store: Arc<dyn ExecutionStateStore>,
    retry: RetryPolicy,
}

impl RunStateGate {
    pub fn new(store: Arc<dyn ExecutionStateStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// # Summary
    /// 过滤出可以启动的候选流水线。
    ///
    /// # Logic
    /// 1. 候选为空时直接返回，不访问存储。
    /// 2. 批量查询非终态执行，数据库错误按退避策略重试。
    /// 3. 从候选中减去查询结果。
    ///
    /// # Arguments
    /// * `candidates` - 匹配器产出的候选流水线。
    ///
    /// # Returns
    /// 可启动的流水线集合，或重试耗尽后的最后一个错误。
    pub async fn filter_runnable(
        &self,
        candidates: &BTreeSet<PipelineId>,
    ) -> Result<BTreeSet<PipelineId>, StoreError> {
        if candidates.is_empty() {
            return Ok(BTreeSet::new());
        }

        let running = self
            .retry
            .run(
                "Run-state query",
                |e| matches!(e, StoreError::Database(_)),
                || self.store.running_among(candidates),
            )
            .await
            .inspect_err(|e| error!(candidates = candidates.len(), "Run-state query gave up: {}", e))?;

        let runnable: BTreeSet<PipelineId> = candidates
            .iter()
            .filter(|id| !running.contains(*id))
            .cloned()
            .collect();
        debug!(
            candidates = candidates.len(),
            running = running.len(),
            runnable = runnable.len(),
            "Run-state gate applied"
        );
        Ok(runnable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kairos_core::config::RetryConfig;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyStore {
        running: HashSet<PipelineId>,
        failures: AtomicUsize,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionStateStore for FlakyStore {
        async fn running_among(
            &self,
            pipeline_ids: &BTreeSet<PipelineId>,
        ) -> Result<HashSet<PipelineId>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Database("timeout".into()));
            }
            Ok(pipeline_ids
                .iter()
                .filter(|id| self.running.contains(*id))
                .cloned()
                .collect())
        }
    }

    fn gate(failures: usize) -> (RunStateGate, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore {
            running: HashSet::from([PipelineId::from("P2")]),
            failures: AtomicUsize::new(failures),
            queries: AtomicUsize::new(0),
        });
        let retry = RetryPolicy::from(&RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 40,
            multiplier: 2.0,
        });
        (RunStateGate::new(store.clone(), retry), store)
    }

    fn set(ids: &[&str]) -> BTreeSet<PipelineId> {
        ids.iter().map(|s| PipelineId::from(*s)).collect()
    }

    #[tokio::test]
    async fn test_subtracts_running_with_one_query() {
        let (gate, store) = gate(0);
        let runnable = gate.filter_runnable(&set(&["P1", "P2", "P3"])).await.unwrap();
        assert_eq!(runnable, set(&["P1", "P3"]));
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_candidates_no_query() {
        let (gate, store) = gate(0);
        assert!(gate.filter_runnable(&BTreeSet::new()).await.unwrap().is_empty());
        assert_eq!(store.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let (gate, store) = gate(2);
        let runnable = gate.filter_runnable(&set(&["P1", "P2"])).await.unwrap();
        assert_eq!(runnable, set(&["P1"]));
        assert_eq!(store.queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_abort() {
        let (gate, store) = gate(10);
        assert!(gate.filter_runnable(&set(&["P1"])).await.is_err());
        assert_eq!(store.queries.load(Ordering::SeqCst), 3);
    }
}
