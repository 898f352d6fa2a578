use chrono::Utc;
use kairos_core::common::{OwnerId, PipelineId, SignalId};
use kairos_core::dispatch::entity::{EnqueueAck, ExecutionRequest};
use kairos_core::dispatch::error::QueueError;
use kairos_core::dispatch::port::TaskQueue;
use kairos_core::execution::entity::ExecutionStatus;
use kairos_core::execution::port::ExecutionStateStore;
use kairos_core::subscription::entity::SignalFilter;
use kairos_core::subscription::port::SubscriptionSource;
use kairos_store::db::connect_file;
use kairos_store::execution::SqliteExecutionStore;
use kairos_store::memory::{MemoryExecutionStore, MemoryTaskQueue};
use kairos_store::queue::SqliteTaskQueue;
use kairos_store::subscription::{PipelineRecord, SqliteSubscriptionSource, TriggerMode};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::tempdir;

fn record(id: &str, active: bool, mode: TriggerMode, tickers: &[&str]) -> PipelineRecord {
    PipelineRecord {
        id: PipelineId::from(id),
        owner_id: OwnerId::from("u1"),
        active,
        trigger_mode: mode,
        watched_tickers: tickers.iter().map(|t| t.to_string()).collect(),
        filters: vec![SignalFilter {
            signal_type: Some("golden_cross".into()),
            min_confidence: 70.0,
        }],
    }
}

fn request(pipeline: &str, signals: &[&str]) -> ExecutionRequest {
    let pipeline_id = PipelineId::from(pipeline);
    let matched: Vec<SignalId> = signals.iter().map(|s| SignalId::from(*s)).collect();
    ExecutionRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        dispatch_key: ExecutionRequest::dispatch_key(&pipeline_id, &matched),
        pipeline_id,
        owner_id: OwnerId::from("u1"),
        matched_signal_ids: matched,
        triggered_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_load_active_only_returns_signal_triggered_pipelines() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let pool = connect_file(&tmp_dir.path().join("dispatch.db")).await?;
    let source = SqliteSubscriptionSource::new(pool.clone());

    source
        .upsert_pipeline(&record("P1", true, TriggerMode::Signal, &["AAPL", "MSFT"]))
        .await?;
    source
        .upsert_pipeline(&record("P2", false, TriggerMode::Signal, &["AAPL"]))
        .await?;
    source
        .upsert_pipeline(&record("P3", true, TriggerMode::Schedule, &["AAPL"]))
        .await?;
    source
        .upsert_pipeline(&record("P4", true, TriggerMode::Manual, &["TSLA"]))
        .await?;

    let entries = source.load_active().await?;
    assert_eq!(entries.len(), 1);
    let p1 = &entries[0];
    assert_eq!(p1.pipeline_id, PipelineId::from("P1"));
    assert!(p1.watched_tickers.contains("MSFT"));
    assert_eq!(p1.filters[0].min_confidence, 70.0);

    // 停用后下一次加载不再出现
    source
        .upsert_pipeline(&record("P1", false, TriggerMode::Signal, &["AAPL"]))
        .await?;
    assert!(source.load_active().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_corrupt_trigger_config_is_skipped() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let pool = connect_file(&tmp_dir.path().join("dispatch.db")).await?;
    let source = SqliteSubscriptionSource::new(pool.clone());
    source
        .upsert_pipeline(&record("P1", true, TriggerMode::Signal, &["AAPL"]))
        .await?;

    sqlx::query(
        "INSERT INTO pipelines (id, owner_id, active, trigger_mode, watched_tickers, signal_filters, updated_at) \
         VALUES ('BROKEN', 'u2', 1, 'signal', 'not-json', '[]', ?)",
    )
    .bind(Utc::now())
    .execute(&pool)
    .await?;

    let entries = source.load_active().await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].pipeline_id, PipelineId::from("P1"));
    Ok(())
}

#[tokio::test]
async fn test_running_among_filters_by_non_terminal_status() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let pool = connect_file(&tmp_dir.path().join("dispatch.db")).await?;
    let store = SqliteExecutionStore::new(pool);

    store.record_execution(&PipelineId::from("P1"), ExecutionStatus::Running).await?;
    store.record_execution(&PipelineId::from("P2"), ExecutionStatus::Succeeded).await?;
    store.record_execution(&PipelineId::from("P3"), ExecutionStatus::Pending).await?;
    store.record_execution(&PipelineId::from("P4"), ExecutionStatus::Failed).await?;

    let candidates: BTreeSet<PipelineId> = ["P1", "P2", "P3", "P4", "P5"]
        .into_iter()
        .map(PipelineId::from)
        .collect();
    let running = store.running_among(&candidates).await?;
    assert_eq!(running.len(), 2);
    assert!(running.contains(&PipelineId::from("P1")));
    assert!(running.contains(&PipelineId::from("P3")));

    assert!(store.running_among(&BTreeSet::new()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_enqueue_is_compare_and_set_per_pipeline() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let pool = connect_file(&tmp_dir.path().join("dispatch.db")).await?;
    let queue = SqliteTaskQueue::new(pool.clone());
    let store = SqliteExecutionStore::new(pool);
    let p1 = PipelineId::from("P1");

    assert_eq!(queue.enqueue(&request("P1", &["s1", "s2"])).await?, EnqueueAck::Accepted);
    // 同一流水线已有 pending 执行，第二次入队被抑制
    assert_eq!(queue.enqueue(&request("P1", &["s3"])).await?, EnqueueAck::Duplicate);
    assert_eq!(queue.enqueue(&request("P2", &["s3"])).await?, EnqueueAck::Accepted);

    let requests = queue.requests_for(&p1).await?;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].dispatch_key, "P1:s1,s2");
    assert_eq!(
        requests[0].matched_signal_ids,
        vec![SignalId::from("s1"), SignalId::from("s2")]
    );

    let running = store.running_among(&BTreeSet::from([p1.clone()])).await?;
    assert!(running.contains(&p1));

    // 执行结束后允许再次入队
    let executions = store.list_for_pipeline(&p1).await?;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].1, ExecutionStatus::Pending);
    store.mark_status(&executions[0].0, ExecutionStatus::Succeeded).await?;
    assert_eq!(queue.enqueue(&request("P1", &["s4"])).await?, EnqueueAck::Accepted);
    assert_eq!(queue.requests_for(&p1).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_retry_of_committed_request_is_accepted() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let pool = connect_file(&tmp_dir.path().join("dispatch.db")).await?;
    let queue = SqliteTaskQueue::new(pool);
    let p1 = PipelineId::from("P1");

    // 第一次提交成功但调用方没收到确认，用同一个请求重试
    let first = request("P1", &["s1"]);
    assert_eq!(queue.enqueue(&first).await?, EnqueueAck::Accepted);
    assert_eq!(queue.enqueue(&first).await?, EnqueueAck::Accepted);
    assert_eq!(queue.requests_for(&p1).await?.len(), 1);

    // 不同请求仍被非终态执行抑制
    assert_eq!(queue.enqueue(&request("P1", &["s1"])).await?, EnqueueAck::Duplicate);
    assert_eq!(queue.requests_for(&p1).await?.len(), 1);

    let executions = Arc::new(MemoryExecutionStore::new());
    let memory = MemoryTaskQueue::with_executions(executions);
    assert_eq!(memory.enqueue(&first).await?, EnqueueAck::Accepted);
    assert_eq!(memory.enqueue(&first).await?, EnqueueAck::Accepted);
    assert_eq!(memory.enqueue(&request("P1", &["s2"])).await?, EnqueueAck::Duplicate);
    assert_eq!(memory.requests().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_mark_status_unknown_execution() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let pool = connect_file(&tmp_dir.path().join("dispatch.db")).await?;
    let store = SqliteExecutionStore::new(pool);
    let result = store.mark_status("missing", ExecutionStatus::Cancelled).await;
    assert!(matches!(result, Err(kairos_core::store::error::StoreError::NotFound)));
    Ok(())
}

#[tokio::test]
async fn test_memory_queue_mirrors_sqlite_semantics() {
    let executions = Arc::new(MemoryExecutionStore::new());
    let queue = MemoryTaskQueue::with_executions(executions.clone());

    queue.fail_next(1);
    assert!(matches!(
        queue.enqueue(&request("P1", &["s1"])).await,
        Err(QueueError::Unavailable(_))
    ));
    assert_eq!(queue.enqueue(&request("P1", &["s1"])).await.unwrap(), EnqueueAck::Accepted);
    assert_eq!(queue.enqueue(&request("P1", &["s2"])).await.unwrap(), EnqueueAck::Duplicate);
    assert_eq!(executions.status(&PipelineId::from("P1")), Some(ExecutionStatus::Pending));
    assert_eq!(queue.attempt_count(), 3);
    assert_eq!(queue.requests().await.len(), 1);

    let running = executions
        .running_among(&BTreeSet::from([PipelineId::from("P1"), PipelineId::from("P2")]))
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(executions.query_count(), 1);
}
