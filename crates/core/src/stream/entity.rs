use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// # Summary
/// 信号流中一条记录的读位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamPosition {
    pub partition: i32,
    pub offset: i64,
}

/// # Summary
/// 从信号流读出的一条原始记录，解码前的形态。
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub position: StreamPosition,
    pub payload: Vec<u8>,
}

/// 每个分区取最大 offset，作为批次处理完成后的提交集合
pub fn highest_per_partition(positions: &[StreamPosition]) -> Vec<StreamPosition> {
    fold_per_partition(positions, |cur, new| new > cur)
}

/// 每个分区取最小 offset，作为批次需要整体重投时的回退集合
pub fn lowest_per_partition(positions: &[StreamPosition]) -> Vec<StreamPosition> {
    fold_per_partition(positions, |cur, new| new < cur)
}

fn fold_per_partition(
    positions: &[StreamPosition],
    replace: impl Fn(i64, i64) -> bool,
) -> Vec<StreamPosition> {
    let mut per_partition: BTreeMap<i32, i64> = BTreeMap::new();
    for pos in positions {
        per_partition
            .entry(pos.partition)
            .and_modify(|cur| {
                if replace(*cur, pos.offset) {
                    *cur = pos.offset;
                }
            })
            .or_insert(pos.offset);
    }
    per_partition
        .into_iter()
        .map(|(partition, offset)| StreamPosition { partition, offset })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(partition: i32, offset: i64) -> StreamPosition {
        StreamPosition { partition, offset }
    }

    #[test]
    fn test_per_partition_bounds() {
        let positions = [pos(1, 7), pos(0, 3), pos(1, 5), pos(0, 4), pos(1, 9)];
        assert_eq!(highest_per_partition(&positions), vec![pos(0, 4), pos(1, 9)]);
        assert_eq!(lowest_per_partition(&positions), vec![pos(0, 3), pos(1, 5)]);
        assert!(highest_per_partition(&[]).is_empty());
    }
}
