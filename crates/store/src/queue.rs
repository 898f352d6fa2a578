use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kairos_core::common::{OwnerId, PipelineId, SignalId};
use kairos_core::dispatch::entity::{EnqueueAck, ExecutionRequest};
use kairos_core::dispatch::error::QueueError;
use kairos_core::dispatch::port::TaskQueue;
use kairos_core::execution::entity::ExecutionStatus;
use kairos_core::store::error::StoreError;
use sqlx::SqlitePool;
use tracing::debug;

/// # Summary
/// 基于 SQLite 表的任务队列实现，执行层从 `execution_requests` 表领取任务。
///
/// # Invariants
/// * 入队与创建 `pending` 执行记录在同一事务内完成。
/// * 借助 `uq_executions_non_terminal` 唯一索引做比较并设置：
///   流水线已有非终态执行时不写入任何数据，返回 `EnqueueAck::Duplicate`。
pub struct SqliteTaskQueue {
    pool: SqlitePool,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// # Summary
    /// 读取某条流水线的全部执行请求，按触发时间升序。
    pub async fn requests_for(
        &self,
        pipeline_id: &PipelineId,
    ) -> Result<Vec<ExecutionRequest>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, DateTime<Utc>)>(
            r#"
            SELECT id, pipeline_id, owner_id, signal_ids, dispatch_key, triggered_at
            FROM execution_requests
            WHERE pipeline_id = ?
            ORDER BY triggered_at, id
            "#,
        )
        .bind(&pipeline_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|(id, pipeline_id, owner_id, signal_ids, dispatch_key, triggered_at)| {
                let matched_signal_ids: Vec<SignalId> = serde_json::from_str(&signal_ids)
                    .map_err(|e| StoreError::Corrupt {
                        id: id.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(ExecutionRequest {
                    request_id: id,
                    pipeline_id: PipelineId(pipeline_id),
                    owner_id: OwnerId(owner_id),
                    matched_signal_ids,
                    triggered_at,
                    dispatch_key,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    /// # Logic
    /// 1. 开启事务。
    /// 2. `INSERT OR IGNORE` 一条 `pending` 执行记录；被唯一索引忽略说明已有非终态执行。
    /// 3. 被忽略时，若同一 `request_id` 已经落库，说明是已提交请求的重试，按 `Accepted` 返回。
    /// 4. 写入执行请求并提交。
    async fn enqueue(&self, request: &ExecutionRequest) -> Result<EnqueueAck, QueueError> {
        let signal_ids = serde_json::to_string(&request.matched_signal_ids)
            .map_err(|e| QueueError::Serialize(e.to_string()))?;
        let execution_id = uuid::Uuid::new_v4().to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO pipeline_executions
            (id, pipeline_id, status, dispatch_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution_id)
        .bind(&request.pipeline_id.0)
        .bind(ExecutionStatus::Pending.as_str())
        .bind(&request.dispatch_key)
        .bind(request.triggered_at)
        .bind(request.triggered_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        if inserted.rows_affected() == 0 {
            let recorded = sqlx::query("SELECT 1 FROM execution_requests WHERE id = ?")
                .bind(&request.request_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?
                .is_some();
            tx.rollback()
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            if recorded {
                debug!(pipeline_id = %request.pipeline_id, request_id = %request.request_id, "Request already recorded, treating retry as accepted");
                return Ok(EnqueueAck::Accepted);
            }
            debug!(pipeline_id = %request.pipeline_id, "Enqueue suppressed by non-terminal execution");
            return Ok(EnqueueAck::Duplicate);
        }

        sqlx::query(
            r#"
            INSERT INTO execution_requests
            (id, execution_id, pipeline_id, owner_id, signal_ids, dispatch_key, triggered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.request_id)
        .bind(&execution_id)
        .bind(&request.pipeline_id.0)
        .bind(&request.owner_id.0)
        .bind(signal_ids)
        .bind(&request.dispatch_key)
        .bind(request.triggered_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(EnqueueAck::Accepted)
    }
}
