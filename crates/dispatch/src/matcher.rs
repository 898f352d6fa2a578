use kairos_core::common::{PipelineId, SignalId};
use kairos_core::signal::entity::Signal;
use kairos_core::subscription::entity::SubscriptionSnapshot;
use std::collections::BTreeMap;

/// 匹配结果：候选流水线 → 触发它的信号 ID（按信号在批次中的顺序）
pub type MatchResult = BTreeMap<PipelineId, Vec<SignalId>>;

/// # Summary
/// 将一个批次的信号与订阅快照求交，得到候选流水线。
///
/// # Logic
/// 1. 对每条信号的每个条目，通过倒排索引取关注该证券代码的订阅。
/// 2. 订阅接受该条目时，把信号 ID 记到该流水线名下。
/// 3. 同一流水线在一个批次内只出现一次；同一信号 ID 只记录一次。
///
/// # Arguments
/// * `signals` - 批次中的信号。
/// * `snapshot` - 本批次开始时取得的订阅快照，整批使用同一份。
///
/// # Returns
/// 以流水线 ID 升序排列的候选集合。纯函数，无 I/O。
pub fn match_batch(signals: &[Signal], snapshot: &SubscriptionSnapshot) -> MatchResult {
    let mut matched = MatchResult::new();
    for signal in signals {
        for entry in &signal.entries {
            for subscription in snapshot.watchers(&entry.ticker) {
                if !subscription.accepts(&signal.signal_type, entry) {
                    continue;
                }
                let ids = matched.entry(subscription.pipeline_id.clone()).or_default();
                if !ids.contains(&signal.id) {
                    ids.push(signal.id.clone());
                }
            }
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kairos_core::common::OwnerId;
    use kairos_core::signal::entity::{Direction, SignalEntry};
    use kairos_core::subscription::entity::{SignalFilter, SubscriptionEntry};

    fn entry(ticker: &str, confidence: f64) -> SignalEntry {
        SignalEntry {
            ticker: ticker.to_string(),
            direction: Direction::Bullish,
            confidence,
        }
    }

    fn signal(id: &str, signal_type: &str, entries: Vec<SignalEntry>) -> Signal {
        Signal {
            id: SignalId::from(id),
            emitted_at: Utc::now(),
            signal_type: signal_type.to_string(),
            entries,
            source: "test".into(),
        }
    }

    fn filter(signal_type: Option<&str>, min_confidence: f64) -> SignalFilter {
        SignalFilter {
            signal_type: signal_type.map(str::to_string),
            min_confidence,
        }
    }

    fn subscription(id: &str, tickers: &[&str], filters: Vec<SignalFilter>) -> SubscriptionEntry {
        SubscriptionEntry {
            pipeline_id: PipelineId::from(id),
            owner_id: OwnerId::from("owner"),
            watched_tickers: tickers.iter().map(|t| t.to_string()).collect(),
            filters,
        }
    }

    fn snapshot(entries: Vec<SubscriptionEntry>) -> SubscriptionSnapshot {
        SubscriptionSnapshot::new(entries, Utc::now())
    }

    fn ids(raw: &[&str]) -> Vec<SignalId> {
        raw.iter().map(|s| SignalId::from(*s)).collect()
    }

    #[test]
    fn test_golden_cross_scenario() {
        let snap = snapshot(vec![subscription(
            "P1",
            &["AAPL"],
            vec![filter(Some("golden_cross"), 80.0)],
        )]);
        let batch = [signal("s1", "golden_cross", vec![entry("AAPL", 85.0)])];

        let result = match_batch(&batch, &snap);
        assert_eq!(result.len(), 1);
        assert_eq!(result[&PipelineId::from("P1")], ids(&["s1"]));
    }

    #[test]
    fn test_confidence_is_inclusive() {
        let snap = snapshot(vec![subscription("P1", &["AAPL"], vec![filter(None, 80.0)])]);
        assert!(!match_batch(&[signal("s1", "x", vec![entry("AAPL", 80.0)])], &snap).is_empty());
        assert!(match_batch(&[signal("s2", "x", vec![entry("AAPL", 79.99)])], &snap).is_empty());
    }

    #[test]
    fn test_type_must_match_exactly() {
        let snap = snapshot(vec![subscription(
            "P1",
            &["AAPL"],
            vec![filter(Some("golden_cross"), 0.0)],
        )]);
        assert!(match_batch(&[signal("s1", "Golden_Cross", vec![entry("AAPL", 99.0)])], &snap).is_empty());
        assert!(match_batch(&[signal("s2", "death_cross", vec![entry("AAPL", 99.0)])], &snap).is_empty());
    }

    #[test]
    fn test_ticker_is_case_sensitive() {
        let snap = snapshot(vec![subscription("P1", &["AAPL"], vec![])]);
        assert!(match_batch(&[signal("s1", "x", vec![entry("aapl", 99.0)])], &snap).is_empty());
    }

    #[test]
    fn test_empty_filters_accept_anything() {
        let snap = snapshot(vec![subscription("P1", &["TSLA"], vec![])]);
        let result = match_batch(&[signal("s1", "anything", vec![entry("TSLA", 0.0)])], &snap);
        assert_eq!(result[&PipelineId::from("P1")], ids(&["s1"]));
    }

    #[test]
    fn test_any_filter_may_accept() {
        let snap = snapshot(vec![subscription(
            "P1",
            &["AAPL"],
            vec![filter(Some("golden_cross"), 90.0), filter(Some("rsi_oversold"), 50.0)],
        )]);
        let batch = [
            signal("s1", "golden_cross", vec![entry("AAPL", 85.0)]),
            signal("s2", "rsi_oversold", vec![entry("AAPL", 55.0)]),
        ];
        let result = match_batch(&batch, &snap);
        assert_eq!(result[&PipelineId::from("P1")], ids(&["s2"]));
    }

    #[test]
    fn test_pipeline_appears_once_with_all_signal_ids() {
        let snap = snapshot(vec![
            subscription("P2", &["AAPL", "MSFT"], vec![]),
            subscription("P1", &["MSFT"], vec![]),
        ]);
        let batch = [
            // 同一信号的两个条目都命中 P2，只记录一次
            signal("s1", "x", vec![entry("AAPL", 10.0), entry("MSFT", 10.0)]),
            signal("s2", "x", vec![entry("MSFT", 10.0)]),
            signal("s3", "x", vec![entry("NVDA", 10.0)]),
        ];
        let result = match_batch(&batch, &snap);
        let keys: Vec<_> = result.keys().map(|p| p.0.as_str()).collect();
        assert_eq!(keys, vec!["P1", "P2"]);
        assert_eq!(result[&PipelineId::from("P1")], ids(&["s1", "s2"]));
        assert_eq!(result[&PipelineId::from("P2")], ids(&["s1", "s2"]));
    }

    #[test]
    fn test_cold_snapshot_matches_nothing() {
        let batch = [signal("s1", "golden_cross", vec![entry("AAPL", 100.0)])];
        assert!(match_batch(&batch, &SubscriptionSnapshot::cold()).is_empty());
    }

    #[test]
    fn test_matching_is_deterministic() {
        let snap = snapshot(
            (0..50)
                .map(|i| subscription(&format!("P{:02}", i), &["AAPL"], vec![]))
                .collect(),
        );
        let batch = [signal("s1", "x", vec![entry("AAPL", 1.0)])];
        let first = match_batch(&batch, &snap);
        assert_eq!(first.len(), 50);
        assert_eq!(first, match_batch(&batch, &snap));
    }
}
