//! 内存适配器，供测试与本地演练使用，同时承担执行层的最小模拟。

use async_trait::async_trait;
use dashmap::DashMap;
use kairos_core::common::PipelineId;
use kairos_core::dispatch::entity::{EnqueueAck, ExecutionRequest};
use kairos_core::dispatch::error::QueueError;
use kairos_core::dispatch::port::TaskQueue;
use kairos_core::execution::entity::ExecutionStatus;
use kairos_core::execution::port::ExecutionStateStore;
use kairos_core::store::error::StoreError;
use kairos_core::subscription::entity::SubscriptionEntry;
use kairos_core::subscription::port::SubscriptionSource;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// 原子地消耗一次"接下来 N 次失败"的配额
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// # Summary
/// 基于内存的订阅源，可切换为持续失败以模拟订阅库故障。
#[derive(Default)]
pub struct MemorySubscriptionSource {
    entries: RwLock<Vec<SubscriptionEntry>>,
    failing: AtomicBool,
    loads: AtomicUsize,
}

impl MemorySubscriptionSource {
    pub fn new(entries: Vec<SubscriptionEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            ..Default::default()
        }
    }

    /// 整体替换订阅数据，下一次刷新生效
    pub async fn replace(&self, entries: Vec<SubscriptionEntry>) {
        *self.entries.write().await = entries;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 已执行的加载次数（含失败）
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionSource for MemorySubscriptionSource {
    async fn load_active(&self) -> Result<Vec<SubscriptionEntry>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database("subscription store offline".into()));
        }
        Ok(self.entries.read().await.clone())
    }
}

/// # Summary
/// 基于内存的执行状态库，每条流水线只记录最近一次执行的状态。
///
/// # Invariants
/// - `running_among` 每次调用计为一次查询，供测试断言"一批一查"。
#[derive(Default)]
pub struct MemoryExecutionStore {
    statuses: DashMap<PipelineId, ExecutionStatus>,
    queries: AtomicUsize,
    fail_next: AtomicUsize,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, pipeline_id: &PipelineId, status: ExecutionStatus) {
        self.statuses.insert(pipeline_id.clone(), status);
    }

    pub fn status(&self, pipeline_id: &PipelineId) -> Option<ExecutionStatus> {
        self.statuses.get(pipeline_id).map(|s| *s.value())
    }

    /// 接下来 `n` 次查询返回数据库错误
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// 比较并设置：没有非终态执行时写入 `Pending` 并返回 `true`
    fn try_start(&self, pipeline_id: &PipelineId) -> bool {
        let mut slot = self
            .statuses
            .entry(pipeline_id.clone())
            .or_insert(ExecutionStatus::Succeeded);
        if slot.is_terminal() {
            *slot = ExecutionStatus::Pending;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ExecutionStateStore for MemoryExecutionStore {
    async fn running_among(
        &self,
        pipeline_ids: &BTreeSet<PipelineId>,
    ) -> Result<HashSet<PipelineId>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_next) {
            return Err(StoreError::Database("execution store timeout".into()));
        }
        Ok(pipeline_ids
            .iter()
            .filter(|id| self.status(id).is_some_and(|s| !s.is_terminal()))
            .cloned()
            .collect())
    }
}

/// # Summary
/// 基于内存的任务队列。
///
/// # Logic
/// 若关联了 `MemoryExecutionStore`，入队时会像执行层一样写入 `Pending` 状态，
/// 并在已有非终态执行时返回 `EnqueueAck::Duplicate`。
/// 已记录过的 `request_id` 再次入队视为重试，返回 `EnqueueAck::Accepted`。
#[derive(Default)]
pub struct MemoryTaskQueue {
    requests: RwLock<Vec<ExecutionRequest>>,
    executions: Option<Arc<MemoryExecutionStore>>,
    fail_next: AtomicUsize,
    reject_all: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryTaskQueue {
    /// 关联执行状态库，使入队具备比较并设置语义
    pub fn with_executions(executions: Arc<MemoryExecutionStore>) -> Self {
        Self {
            executions: Some(executions),
            ..Default::default()
        }
    }

    /// 接下来 `n` 次入队返回 `QueueError::Unavailable`
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.reject_all.store(rejecting, Ordering::SeqCst);
    }

    /// 入队调用次数（含失败）
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, request: &ExecutionRequest) -> Result<EnqueueAck, QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_next) {
            return Err(QueueError::Unavailable("queue connection reset".into()));
        }
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(QueueError::Rejected("payload refused".into()));
        }
        let mut requests = self.requests.write().await;
        // 同一请求的重试
        if requests.iter().any(|r| r.request_id == request.request_id) {
            return Ok(EnqueueAck::Accepted);
        }
        if let Some(executions) = &self.executions
            && !executions.try_start(&request.pipeline_id)
        {
            return Ok(EnqueueAck::Duplicate);
        }
        requests.push(request.clone());
        Ok(EnqueueAck::Accepted)
    }
}
