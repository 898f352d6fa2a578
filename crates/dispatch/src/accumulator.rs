use kairos_core::common::SignalId;
use kairos_core::signal::entity::Signal;
use kairos_core::stream::entity::StreamPosition;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// 批次被放行的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// 数量达到阈值
    Size,
    /// 自第一条信号起的时间窗口到期
    Deadline,
    /// 引擎关闭，放行未满的窗口
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushReason::Size => write!(f, "size"),
            FlushReason::Deadline => write!(f, "deadline"),
            FlushReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// # Summary
/// 一个放行的批次。
///
/// # Invariants
/// - `signals` 中的信号 ID 互不相同，保持到达顺序。
/// - `positions` 覆盖窗口内读到的全部记录，包括解码失败与重复投递的记录，
///   这样批次提交后它们也不会被再次投递。
#[derive(Debug, Clone)]
pub struct Batch {
    // 放行序号，单调递增，跨代数连续
    pub seq: u64,
    // 入口的回退代数，回退之前累积的批次会被丢弃
    pub epoch: u64,
    pub signals: Vec<Signal>,
    pub positions: Vec<StreamPosition>,
    // 窗口内被忽略的重复信号数
    pub duplicates: usize,
    pub reason: FlushReason,
    pub opened_at: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

/// 累积器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Empty,
    Accumulating { opened_at: Instant, deadline: Instant },
}

/// # Summary
/// 批次累积器：按"数量阈值或时间窗口，先到者为准"放行信号。
///
/// # Invariants
/// - 显式状态机：`Empty` 时没有截止时间；第一条记录（信号或跳过的位置）进入 `Accumulating` 并设置截止时间。
/// - 放行后回到 `Empty`，下一条信号重新开窗。
/// - 本身不读时钟，所有时间由调用方传入，便于测试。
pub struct BatchAccumulator {
    size_threshold: usize,
    window: Duration,
    epoch: u64,
    next_seq: u64,
    state: State,
    signals: Vec<Signal>,
    seen: HashSet<SignalId>,
    positions: Vec<StreamPosition>,
    duplicates: usize,
}

impl BatchAccumulator {
    /// # Arguments
    /// * `size_threshold` - 数量阈值，至少为 1。
    /// * `window` - 自窗口内第一条信号起的最长等待时间。
    pub fn new(size_threshold: usize, window: Duration) -> Self {
        Self {
            size_threshold: size_threshold.max(1),
            window,
            epoch: 0,
            next_seq: 1,
            state: State::Empty,
            signals: Vec::new(),
            seen: HashSet::new(),
            positions: Vec::new(),
            duplicates: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// 当前窗口的截止时间，`Empty` 时为 `None`
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Empty => None,
            State::Accumulating { deadline, .. } => Some(deadline),
        }
    }

    /// # Summary
    /// 接收一条信号。
    ///
    /// # Logic
    /// 1. `Empty` 状态下开窗，截止时间为 `now + window`。
    /// 2. 窗口内已有相同 ID 的信号时只记录位置，计为重复。
    /// 3. 数量达到阈值时立即放行。
    ///
    /// # Returns
    /// 放行的批次，或 `None` 表示继续累积。
    pub fn accept(&mut self, signal: Signal, position: StreamPosition, now: Instant) -> Option<Batch> {
        self.open(now);
        self.positions.push(position);
        if !self.seen.insert(signal.id.clone()) {
            self.duplicates += 1;
            return None;
        }
        self.signals.push(signal);

        if self.signals.len() >= self.size_threshold {
            return self.release(FlushReason::Size, now);
        }
        None
    }

    /// 记录一条不产生信号的记录位置（如解码失败）。
    /// 同样会开窗，只有位置的批次也按截止时间放行并提交。
    pub fn skip(&mut self, position: StreamPosition, now: Instant) {
        self.open(now);
        self.positions.push(position);
    }

    /// 截止时间已到时放行当前窗口
    pub fn poll_deadline(&mut self, now: Instant) -> Option<Batch> {
        match self.state {
            State::Accumulating { deadline, .. } if now >= deadline => {
                self.release(FlushReason::Deadline, now)
            }
            _ => None,
        }
    }

    /// 当前窗口内已读到的全部记录位置
    pub fn positions(&self) -> &[StreamPosition] {
        &self.positions
    }

    /// 无条件放行当前内容，没有任何内容时返回 `None`
    pub fn flush(&mut self, reason: FlushReason, now: Instant) -> Option<Batch> {
        if self.signals.is_empty() && self.positions.is_empty() {
            return None;
        }
        self.release(reason, now)
    }

    /// 丢弃当前窗口并进入新的代数，用于流位置回退之后
    pub fn restart(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.reset();
    }

    fn open(&mut self, now: Instant) {
        if self.state == State::Empty {
            self.state = State::Accumulating {
                opened_at: now,
                deadline: now + self.window,
            };
        }
    }

    fn release(&mut self, reason: FlushReason, now: Instant) -> Option<Batch> {
        let opened_at = match self.state {
            State::Accumulating { opened_at, .. } => opened_at,
            State::Empty => now,
        };
        let batch = Batch {
            seq: self.next_seq,
            epoch: self.epoch,
            signals: std::mem::take(&mut self.signals),
            positions: std::mem::take(&mut self.positions),
            duplicates: self.duplicates,
            reason,
            opened_at,
        };
        self.next_seq += 1;
        self.reset();
        Some(batch)
    }

    fn reset(&mut self) {
        self.state = State::Empty;
        self.signals.clear();
        self.seen.clear();
        self.positions.clear();
        self.duplicates = 0;
    }
}
