use crate::common::{OwnerId, PipelineId};
use crate::signal::entity::SignalEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// # Summary
/// 订阅的单条信号过滤规则。
///
/// # Invariants
/// - `signal_type` 为空表示接受任意类型；否则精确匹配。
/// - `min_confidence` 取值 0–100，比较使用 `>=`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalFilter {
    #[serde(default)]
    pub signal_type: Option<String>,
    #[serde(default)]
    pub min_confidence: f64,
}

impl SignalFilter {
    /// 判断给定类型与置信度是否满足此规则
    pub fn accepts(&self, signal_type: &str, confidence: f64) -> bool {
        let type_ok = self
            .signal_type
            .as_deref()
            .is_none_or(|wanted| wanted == signal_type);
        type_ok && confidence >= self.min_confidence
    }
}

/// # Summary
/// 缓存中的一条流水线触发配置。
///
/// # Invariants
/// - 只有 `active = true` 且触发模式为信号触发的流水线会出现在这里。
/// - `filters` 为空表示接受任意信号类型与置信度。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub pipeline_id: PipelineId,
    pub owner_id: OwnerId,
    pub watched_tickers: HashSet<String>,
    pub filters: Vec<SignalFilter>,
}

impl SubscriptionEntry {
    /// # Summary
    /// 判断某个信号条目是否触发此订阅。
    ///
    /// # Logic
    /// 1. 证券代码必须在 `watched_tickers` 中（区分大小写）。
    /// 2. `filters` 为空直接接受，否则至少一条规则满足。
    pub fn accepts(&self, signal_type: &str, entry: &SignalEntry) -> bool {
        if !self.watched_tickers.contains(&entry.ticker) {
            return false;
        }
        self.filters.is_empty()
            || self
                .filters
                .iter()
                .any(|f| f.accepts(signal_type, entry.confidence))
    }
}

/// # Summary
/// 订阅缓存的不可变快照。
///
/// # Invariants
/// - 构造后不再修改；刷新时整体替换而非原地更新。
/// - `by_ticker` 是 `entries` 的倒排索引，二者始终由同一次构造产生。
/// - `loaded_at` 为 `None` 表示冷启动的空快照（尚未成功刷新）。
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSnapshot {
    entries: HashMap<PipelineId, SubscriptionEntry>,
    by_ticker: HashMap<String, Vec<PipelineId>>,
    loaded_at: Option<DateTime<Utc>>,
}

impl SubscriptionSnapshot {
    /// # Summary
    /// 由订阅源查询结果构建快照。
    ///
    /// # Logic
    /// 1. 按 `pipeline_id` 建立主索引，重复 ID 以后出现者为准。
    /// 2. 为每个关注的证券代码建立倒排索引，并排序以保证遍历顺序稳定。
    ///
    /// # Arguments
    /// * `entries`: 订阅源返回的全部有效订阅。
    /// * `loaded_at`: 本次加载时间。
    pub fn new(entries: Vec<SubscriptionEntry>, loaded_at: DateTime<Utc>) -> Self {
        let entries: HashMap<PipelineId, SubscriptionEntry> = entries
            .into_iter()
            .map(|e| (e.pipeline_id.clone(), e))
            .collect();

        let mut by_ticker: HashMap<String, Vec<PipelineId>> = HashMap::new();
        for entry in entries.values() {
            for ticker in &entry.watched_tickers {
                by_ticker
                    .entry(ticker.clone())
                    .or_default()
                    .push(entry.pipeline_id.clone());
            }
        }
        for ids in by_ticker.values_mut() {
            ids.sort();
        }

        Self {
            entries,
            by_ticker,
            loaded_at: Some(loaded_at),
        }
    }

    /// 冷启动时使用的空快照
    pub fn cold() -> Self {
        Self::default()
    }

    /// 是否尚未成功加载过
    pub fn is_cold(&self) -> bool {
        self.loaded_at.is_none()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, pipeline_id: &PipelineId) -> Option<&SubscriptionEntry> {
        self.entries.get(pipeline_id)
    }

    /// 关注某个证券代码的全部订阅，按 `pipeline_id` 升序
    pub fn watchers<'a>(&'a self, ticker: &str) -> impl Iterator<Item = &'a SubscriptionEntry> + 'a {
        self.by_ticker
            .get(ticker)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id))
    }
}
