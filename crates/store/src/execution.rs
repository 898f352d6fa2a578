use async_trait::async_trait;
use chrono::Utc;
use kairos_core::common::PipelineId;
use kairos_core::execution::entity::ExecutionStatus;
use kairos_core::execution::port::ExecutionStateStore;
use kairos_core::store::error::StoreError;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

/// # Summary
/// 执行状态库的 SQLite 实现，读取 `pipeline_executions` 表。
///
/// # Invariants
/// * `running_among` 对任意规模的候选集合只发出一条 SELECT。
/// * 状态列只存放 `ExecutionStatus::as_str` 的取值。
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// # Summary
    /// 直接写入一条执行记录（供执行层模拟与测试使用）。
    ///
    /// # Returns
    /// * 新执行记录的 ID。
    pub async fn record_execution(
        &self,
        pipeline_id: &PipelineId,
        status: ExecutionStatus,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO pipeline_executions (id, pipeline_id, status, dispatch_key, created_at, updated_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&pipeline_id.0)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(id)
    }

    /// # Summary
    /// 更新执行记录状态，执行层在运行推进或结束时调用。
    ///
    /// # Returns
    /// * 记录不存在时返回 `StoreError::NotFound`。
    pub async fn mark_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE pipeline_executions SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// 某条流水线的全部执行记录 `(id, status)`，按创建时间升序
    pub async fn list_for_pipeline(
        &self,
        pipeline_id: &PipelineId,
    ) -> Result<Vec<(String, ExecutionStatus)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT id, status FROM pipeline_executions WHERE pipeline_id = ? ORDER BY created_at, id",
        )
        .bind(&pipeline_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|(id, status)| {
                let parsed = ExecutionStatus::from_str(&status).map_err(|reason| {
                    StoreError::Corrupt {
                        id: id.clone(),
                        reason,
                    }
                })?;
                Ok((id, parsed))
            })
            .collect()
    }
}

#[async_trait]
impl ExecutionStateStore for SqliteExecutionStore {
    /// # Logic
    /// 1. 候选集合为空时不访问数据库。
    /// 2. 按候选数量生成 `IN (?, ?, ...)` 占位符并逐个绑定。
    /// 3. 以非终态状态过滤并去重。
    async fn running_among(
        &self,
        pipeline_ids: &BTreeSet<PipelineId>,
    ) -> Result<HashSet<PipelineId>, StoreError> {
        if pipeline_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; pipeline_ids.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT pipeline_id FROM pipeline_executions \
             WHERE status IN ('pending', 'running') AND pipeline_id IN ({})",
            placeholders
        );

        let mut query = sqlx::query_as::<_, (String,)>(&sql);
        for id in pipeline_ids {
            query = query.bind(&id.0);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(|(id,)| PipelineId(id)).collect())
    }
}
