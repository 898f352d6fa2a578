use kairos_core::stream::entity::StreamPosition;
use kairos_core::stream::error::StreamError;
use kairos_core::stream::port::SignalSource;
use kairos_stream::jsonl::JsonlSignalSource;
use kairos_stream::memory::MemorySignalSource;
use std::io::Write;
use std::time::Duration;
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_millis(100);

fn append(path: &std::path::Path, text: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

#[tokio::test]
async fn test_jsonl_reads_complete_lines_in_order() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("signals.jsonl");
    append(&path, "{\"n\":0}\n\n{\"n\":2}\n{\"n\":3")?;

    let source = JsonlSignalSource::open(&path, TIMEOUT).await?;
    let first = source.poll().await?.expect("first line");
    assert_eq!(first.position, StreamPosition { partition: 0, offset: 0 });
    assert_eq!(first.payload, b"{\"n\":0}");

    // 空行占用行号但不投递
    let second = source.poll().await?.expect("third line");
    assert_eq!(second.position.offset, 2);

    // 半行不投递，写完后再读
    assert!(source.poll().await?.is_none());
    append(&path, "}\n")?;
    let third = source.poll().await?.expect("completed line");
    assert_eq!(third.position.offset, 3);
    assert_eq!(third.payload, b"{\"n\":3}");
    Ok(())
}

#[tokio::test]
async fn test_jsonl_resumes_after_committed_offset() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("signals.jsonl");
    append(&path, "a\nb\nc\n")?;

    {
        let source = JsonlSignalSource::open(&path, TIMEOUT).await?;
        let a = source.poll().await?.expect("a");
        let b = source.poll().await?.expect("b");
        source.commit(&[a.position]).await?;
        assert_eq!(b.payload, b"b");
        assert_eq!(source.committed().await?, 1);
        // b 读到了但没有提交，模拟崩溃
    }

    let reopened = JsonlSignalSource::open(&path, TIMEOUT).await?;
    let replayed = reopened.poll().await?.expect("b again");
    assert_eq!(replayed.payload, b"b");
    assert_eq!(replayed.position.offset, 1);
    Ok(())
}

#[tokio::test]
async fn test_jsonl_rewind_redelivers() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("signals.jsonl");
    append(&path, "a\nb\nc\n")?;

    let source = JsonlSignalSource::open(&path, TIMEOUT).await?;
    for _ in 0..3 {
        source.poll().await?;
    }
    source.rewind(&[StreamPosition { partition: 0, offset: 1 }]).await?;
    assert_eq!(source.poll().await?.expect("b").payload, b"b");

    let err = source
        .rewind(&[StreamPosition { partition: 0, offset: 42 }])
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Seek(_)));
    Ok(())
}

#[tokio::test]
async fn test_memory_source_reopen_replays_uncommitted() -> anyhow::Result<()> {
    let source = MemorySignalSource::new(TIMEOUT);
    source.push("a");
    source.push("b");
    source.push("c");

    let a = source.poll().await?.expect("a");
    source.poll().await?;
    source.commit(&[a.position]).await?;

    let restarted = source.reopen();
    assert_eq!(restarted.pending(), 2);
    assert_eq!(restarted.poll().await?.expect("b").payload, b"b");
    Ok(())
}

#[tokio::test]
async fn test_memory_source_rewind_and_close() -> anyhow::Result<()> {
    let source = MemorySignalSource::new(TIMEOUT);
    let p0 = source.push("a");
    source.push("b");
    source.poll().await?;
    source.poll().await?;

    source.rewind(&[p0]).await?;
    assert_eq!(source.rewinds(), vec![vec![p0]]);
    assert_eq!(source.poll().await?.expect("a").payload, b"a");

    source.close();
    assert!(source.poll().await?.is_some());
    assert!(matches!(source.poll().await, Err(StreamError::Closed)));
    Ok(())
}

#[tokio::test]
async fn test_memory_source_wakes_on_push() -> anyhow::Result<()> {
    let source = std::sync::Arc::new(MemorySignalSource::new(Duration::from_secs(5)));
    let poller = {
        let source = source.clone();
        tokio::spawn(async move { source.poll().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    source.push("late");
    let record = poller.await??.expect("woken by push");
    assert_eq!(record.payload, b"late");
    Ok(())
}
