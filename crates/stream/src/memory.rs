use async_trait::async_trait;
use kairos_core::stream::entity::{StreamPosition, StreamRecord};
use kairos_core::stream::error::StreamError;
use kairos_core::stream::port::SignalSource;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// 多个消费者实例共享的日志与提交状态
#[derive(Default)]
struct Log {
    records: Vec<StreamRecord>,
    // 每个分区已提交的最后一条 offset
    committed: BTreeMap<i32, i64>,
    commits: Vec<Vec<StreamPosition>>,
    rewinds: Vec<Vec<StreamPosition>>,
    fail_commits: usize,
    closed: bool,
}

/// # Summary
/// 内存中的分区日志，行为与真实流一致：至少一次投递、按提交位置重启。
///
/// # Logic
/// * `push` / `push_to` 追加记录，每个分区独立编号。
/// * `reopen` 模拟进程重启：共享同一份日志，从已提交位置之后重新消费。
/// * `close` 后读完剩余记录即返回 `StreamError::Closed`。
pub struct MemorySignalSource {
    log: Arc<Mutex<Log>>,
    // 下一条要投递的 `records` 下标
    cursor: Mutex<usize>,
    notify: Arc<Notify>,
    poll_timeout: Duration,
}

impl MemorySignalSource {
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log::default())),
            cursor: Mutex::new(0),
            notify: Arc::new(Notify::new()),
            poll_timeout,
        }
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cursor(&self) -> MutexGuard<'_, usize> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 向分区 0 追加一条记录
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> StreamPosition {
        self.push_to(0, payload)
    }

    /// 向指定分区追加一条记录
    pub fn push_to(&self, partition: i32, payload: impl Into<Vec<u8>>) -> StreamPosition {
        let position = {
            let mut log = self.log();
            let offset = log
                .records
                .iter()
                .filter(|r| r.position.partition == partition)
                .map(|r| r.position.offset + 1)
                .max()
                .unwrap_or(0);
            let position = StreamPosition { partition, offset };
            log.records.push(StreamRecord {
                position,
                payload: payload.into(),
            });
            position
        };
        self.notify.notify_waiters();
        position
    }

    /// 模拟重启：返回共享同一日志的新消费者，从已提交位置之后开始读
    pub fn reopen(&self) -> Self {
        let start = {
            let log = self.log();
            log.records
                .iter()
                .position(|r| {
                    log.committed
                        .get(&r.position.partition)
                        .is_none_or(|c| r.position.offset > *c)
                })
                .unwrap_or(log.records.len())
        };
        Self {
            log: self.log.clone(),
            cursor: Mutex::new(start),
            notify: self.notify.clone(),
            poll_timeout: self.poll_timeout,
        }
    }

    pub fn close(&self) {
        self.log().closed = true;
        self.notify.notify_waiters();
    }

    /// 接下来 `n` 次提交失败
    pub fn fail_next_commits(&self, n: usize) {
        self.log().fail_commits = n;
    }

    /// 每个分区已提交的最后一条 offset
    pub fn committed(&self) -> BTreeMap<i32, i64> {
        self.log().committed.clone()
    }

    /// 全部提交调用，按发生顺序
    pub fn commits(&self) -> Vec<Vec<StreamPosition>> {
        self.log().commits.clone()
    }

    /// 全部回退调用，按发生顺序
    pub fn rewinds(&self) -> Vec<Vec<StreamPosition>> {
        self.log().rewinds.clone()
    }

    /// 尚未投递给当前消费者的记录数
    pub fn pending(&self) -> usize {
        let total = self.log().records.len();
        total.saturating_sub(*self.cursor())
    }

    fn next_record(&self) -> Result<Option<StreamRecord>, StreamError> {
        let log = self.log();
        let mut cursor = self.cursor();
        match log.records.get(*cursor) {
            Some(record) => {
                *cursor += 1;
                Ok(Some(record.clone()))
            }
            None if log.closed => Err(StreamError::Closed),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SignalSource for MemorySignalSource {
    async fn poll(&self) -> Result<Option<StreamRecord>, StreamError> {
        let notified = self.notify.notified();
        if let Some(record) = self.next_record()? {
            return Ok(Some(record));
        }
        // 超时与新记录到达，以先发生者为准
        if tokio::time::timeout(self.poll_timeout, notified).await.is_err() {
            return Ok(None);
        }
        self.next_record()
    }

    async fn commit(&self, positions: &[StreamPosition]) -> Result<(), StreamError> {
        let mut log = self.log();
        if log.fail_commits > 0 {
            log.fail_commits -= 1;
            return Err(StreamError::Commit("broker rejected commit".into()));
        }
        for pos in positions {
            log.committed.insert(pos.partition, pos.offset);
        }
        log.commits.push(positions.to_vec());
        Ok(())
    }

    async fn rewind(&self, positions: &[StreamPosition]) -> Result<(), StreamError> {
        let log = self.log();
        let target = positions
            .iter()
            .filter_map(|p| log.records.iter().position(|r| r.position == *p))
            .min()
            .ok_or_else(|| StreamError::Seek(format!("unknown positions {:?}", positions)))?;
        *self.cursor() = target;
        drop(log);
        self.log().rewinds.push(positions.to_vec());
        Ok(())
    }
}
