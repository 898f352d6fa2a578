use async_trait::async_trait;
use kairos_core::stream::entity::{StreamPosition, StreamRecord};
use kairos_core::stream::error::StreamError;
use kairos_core::stream::port::SignalSource;
use std::ffi::OsString;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 文件日志只有一个分区
pub const JSONL_PARTITION: i32 = 0;

/// 无新数据时两次读取之间的间隔
const TAIL_INTERVAL: Duration = Duration::from_millis(50);

/// 读游标
struct Cursor {
    reader: BufReader<File>,
    // 下一条要读取的行号
    next_line: i64,
    // `next_line` 对应的字节位置
    byte_pos: u64,
    // 已扫描过的每一行的起始字节位置，下标即行号
    line_starts: Vec<u64>,
}

/// # Summary
/// 以追加写入的 JSON-lines 文件作为信号流。
///
/// # Invariants
/// * 只有一个分区 `JSONL_PARTITION`，行号即 offset（从 0 开始，空行也占用行号）。
/// * 只读取以换行符结尾的完整行，写到一半的行留待下次读取。
/// * 已提交位置保存在 `<path>.offset` 旁路文件中，内容为下一条待读取的行号；
///   重启后从该行开始，未提交的记录会被再次投递。
pub struct JsonlSignalSource {
    offset_path: PathBuf,
    poll_timeout: Duration,
    cursor: Mutex<Cursor>,
    // 串行化旁路文件写入
    commit_lock: Mutex<()>,
}

impl JsonlSignalSource {
    /// # Summary
    /// 打开信号日志并定位到上次提交的位置。
    ///
    /// # Logic
    /// 1. 读取旁路文件中的已提交行号，不存在视为 0。
    /// 2. 打开日志文件，不存在则创建。
    /// 3. 从头扫描到已提交行号，建立行起始位置索引。
    ///
    /// # Arguments
    /// * `path` - 信号日志文件路径。
    /// * `poll_timeout` - 一次 `poll` 在无新数据时最长等待的时间。
    pub async fn open(path: impl AsRef<Path>, poll_timeout: Duration) -> Result<Self, StreamError> {
        let path = path.as_ref().to_path_buf();
        let offset_path = sidecar_path(&path);
        let committed = read_committed(&offset_path).await?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StreamError::Unavailable(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| StreamError::Unavailable(format!("{}: {}", path.display(), e)))?;

        let mut cursor = Cursor {
            reader: BufReader::new(file),
            next_line: 0,
            byte_pos: 0,
            line_starts: vec![0],
        };
        while cursor.next_line < committed {
            if read_line(&mut cursor).await?.is_none() {
                warn!(
                    committed,
                    available = cursor.next_line,
                    "Signal log is shorter than its committed offset"
                );
                break;
            }
        }

        info!(path = %path.display(), next_line = cursor.next_line, "JSON-lines signal source opened");
        Ok(Self {
            offset_path,
            poll_timeout,
            cursor: Mutex::new(cursor),
            commit_lock: Mutex::new(()),
        })
    }

    /// 旁路文件中记录的下一条待读取行号
    pub async fn committed(&self) -> Result<i64, StreamError> {
        read_committed(&self.offset_path).await
    }
}

/// `<path>.offset`
fn sidecar_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".offset");
    PathBuf::from(name)
}

async fn read_committed(offset_path: &Path) -> Result<i64, StreamError> {
    match tokio::fs::read_to_string(offset_path).await {
        Ok(raw) => raw.trim().parse::<i64>().map_err(|e| {
            StreamError::Unavailable(format!("{}: {}", offset_path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(StreamError::Unavailable(e.to_string())),
    }
}

fn advance(pos: u64, len: usize) -> u64 {
    pos.saturating_add(u64::try_from(len).unwrap_or(u64::MAX))
}

/// # Summary
/// 读取游标处的一整行并前移游标。
///
/// # Returns
/// * `Some((line_no, bytes))` - 完整的一行（不含换行符）。
/// * `None` - 已到文件末尾，或末尾是尚未写完的半行（游标不动）。
async fn read_line(cursor: &mut Cursor) -> Result<Option<(i64, Vec<u8>)>, StreamError> {
    let mut buf = Vec::new();
    let n = cursor
        .reader
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| StreamError::Unavailable(e.to_string()))?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        cursor
            .reader
            .seek(SeekFrom::Start(cursor.byte_pos))
            .await
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;
        return Ok(None);
    }

    let line_no = cursor.next_line;
    cursor.byte_pos = advance(cursor.byte_pos, n);
    cursor.next_line += 1;
    if usize::try_from(cursor.next_line).is_ok_and(|i| i == cursor.line_starts.len()) {
        cursor.line_starts.push(cursor.byte_pos);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some((line_no, buf)))
}

#[async_trait]
impl SignalSource for JsonlSignalSource {
    /// # Logic
    /// 1. 读取下一条非空完整行。
    /// 2. 没有新数据时每隔 `TAIL_INTERVAL` 重试，直到 `poll_timeout` 到期返回 `None`。
    async fn poll(&self) -> Result<Option<StreamRecord>, StreamError> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            {
                let mut cursor = self.cursor.lock().await;
                while let Some((line_no, payload)) = read_line(&mut cursor).await? {
                    if payload.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Ok(Some(StreamRecord {
                        position: StreamPosition {
                            partition: JSONL_PARTITION,
                            offset: line_no,
                        },
                        payload,
                    }));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(TAIL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// # Logic
    /// 以"先写临时文件再改名"的方式更新旁路文件，内容为 `offset + 1`。
    async fn commit(&self, positions: &[StreamPosition]) -> Result<(), StreamError> {
        let Some(last) = positions.iter().find(|p| p.partition == JSONL_PARTITION) else {
            return Ok(());
        };
        let next = last.offset + 1;

        let _guard = self.commit_lock.lock().await;
        let mut tmp: OsString = self.offset_path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, next.to_string())
            .await
            .map_err(|e| StreamError::Commit(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.offset_path)
            .await
            .map_err(|e| StreamError::Commit(e.to_string()))?;
        debug!(next_line = next, "Signal log offset committed");
        Ok(())
    }

    /// # Logic
    /// 只能回退到已经扫描过的行，游标随之移动到该行起点。
    async fn rewind(&self, positions: &[StreamPosition]) -> Result<(), StreamError> {
        let Some(target) = positions.iter().find(|p| p.partition == JSONL_PARTITION) else {
            return Ok(());
        };

        let mut cursor = self.cursor.lock().await;
        let start = usize::try_from(target.offset)
            .ok()
            .and_then(|i| cursor.line_starts.get(i).copied())
            .ok_or_else(|| StreamError::Seek(format!("line {} not scanned yet", target.offset)))?;

        cursor
            .reader
            .seek(SeekFrom::Start(start))
            .await
            .map_err(|e| StreamError::Seek(e.to_string()))?;
        cursor.byte_pos = start;
        cursor.next_line = target.offset;
        debug!(line = target.offset, "Signal log rewound");
        Ok(())
    }
}
