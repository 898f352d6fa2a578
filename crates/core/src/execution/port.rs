use crate::common::PipelineId;
use crate::store::error::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};

/// # Summary
/// 执行状态库接口 (Port)，供运行状态闸门 (Run-State Gate) 使用。
///
/// # Invariants
/// - 每次调用只允许向底层发出一次批量查询，这是控制存储负载的关键。
/// - 实现类必须保证线程安全 (`Send` + `Sync`)。
#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// # Summary
    /// 查询候选流水线中哪些存在非终态 (pending / running) 的执行记录。
    ///
    /// # Arguments
    /// * `pipeline_ids` - 本批次的候选流水线集合。
    ///
    /// # Returns
    /// * `Result<HashSet<PipelineId>, StoreError>` - 候选集合的子集。
    async fn running_among(
        &self,
        pipeline_ids: &BTreeSet<PipelineId>,
    ) -> Result<HashSet<PipelineId>, StoreError>;
}
