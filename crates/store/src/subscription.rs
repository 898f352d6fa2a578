use async_trait::async_trait;
use chrono::Utc;
use kairos_core::common::{OwnerId, PipelineId};
use kairos_core::store::error::StoreError;
use kairos_core::subscription::entity::{SignalFilter, SubscriptionEntry};
use kairos_core::subscription::port::SubscriptionSource;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::warn;

/// # Summary
/// 流水线的触发方式。只有 `Signal` 模式的流水线会进入订阅缓存。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    Signal,
    Schedule,
    Manual,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Signal => "signal",
            TriggerMode::Schedule => "schedule",
            TriggerMode::Manual => "manual",
        }
    }
}

/// # Summary
/// `pipelines` 表中一行的写入模型，供本地初始化数据与测试使用。
#[derive(Debug, Clone)]
pub struct PipelineRecord {
    pub id: PipelineId,
    pub owner_id: OwnerId,
    pub active: bool,
    pub trigger_mode: TriggerMode,
    pub watched_tickers: Vec<String>,
    pub filters: Vec<SignalFilter>,
}

/// # Summary
/// 订阅源的 SQLite 实现。
///
/// # Invariants
/// * 关注列表与过滤规则以 JSON 列存储，使一次刷新只需一条 SELECT。
/// * 单行数据损坏只跳过该流水线，不影响其余订阅加载。
pub struct SqliteSubscriptionSource {
    pool: SqlitePool,
}

impl SqliteSubscriptionSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// # Summary
    /// 插入或更新一条流水线定义。
    ///
    /// # Arguments
    /// * `record` - 流水线写入模型。
    ///
    /// # Returns
    /// * `Result<(), StoreError>`
    pub async fn upsert_pipeline(&self, record: &PipelineRecord) -> Result<(), StoreError> {
        let tickers = serde_json::to_string(&record.watched_tickers)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let filters = serde_json::to_string(&record.filters)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO pipelines
            (id, owner_id, active, trigger_mode, watched_tickers, signal_filters, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id.0)
        .bind(&record.owner_id.0)
        .bind(record.active)
        .bind(record.trigger_mode.as_str())
        .bind(tickers)
        .bind(filters)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

/// 将一行查询结果解析为订阅实体
fn parse_row(
    id: String,
    owner_id: String,
    tickers: &str,
    filters: &str,
) -> Result<SubscriptionEntry, StoreError> {
    let watched_tickers: HashSet<String> =
        serde_json::from_str(tickers).map_err(|e| StoreError::Corrupt {
            id: id.clone(),
            reason: format!("watched_tickers: {}", e),
        })?;
    let filters: Vec<SignalFilter> =
        serde_json::from_str(filters).map_err(|e| StoreError::Corrupt {
            id: id.clone(),
            reason: format!("signal_filters: {}", e),
        })?;

    Ok(SubscriptionEntry {
        pipeline_id: PipelineId(id),
        owner_id: OwnerId(owner_id),
        watched_tickers,
        filters,
    })
}

#[async_trait]
impl SubscriptionSource for SqliteSubscriptionSource {
    /// # Logic
    /// 1. 单条 SELECT 读取全部 `active = 1 AND trigger_mode = 'signal'` 的流水线。
    /// 2. 逐行解析 JSON 列，损坏的行记录告警后跳过。
    async fn load_active(&self) -> Result<Vec<SubscriptionEntry>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String)>(
            r#"
            SELECT id, owner_id, watched_tickers, signal_filters
            FROM pipelines
            WHERE active = 1 AND trigger_mode = 'signal'
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, owner_id, tickers, filters) in rows {
            match parse_row(id, owner_id, &tickers, &filters) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping pipeline with unreadable trigger config: {}", e),
            }
        }
        Ok(entries)
    }
}
