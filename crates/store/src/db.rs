use kairos_core::store::error::StoreError;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// 默认分发数据库文件名
const DEFAULT_DISPATCH_DB: &str = "dispatch.db";

/// # Summary
/// 打开数据根目录下的分发数据库并初始化表结构。
///
/// # Logic
/// 1. 确保数据根目录存在。
/// 2. 以 WAL 模式打开 `dispatch.db`，不存在则创建。
/// 3. 执行 DDL 初始化流水线、执行记录与执行请求三张表。
///
/// # Returns
/// * `Result<SqlitePool, StoreError>` - 所有 SQLite 适配器共享的连接池。
pub async fn connect() -> Result<SqlitePool, StoreError> {
    let root = crate::config::get_root_dir();
    std::fs::create_dir_all(&root).map_err(|e| StoreError::InitError(e.to_string()))?;
    connect_file(&root.join(DEFAULT_DISPATCH_DB)).await
}

/// 打开指定路径的数据库文件并初始化表结构
pub async fn connect_file(path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

    // 非终态唯一索引是执行层的最终去重手段：同一流水线最多一条 pending/running 记录
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            trigger_mode TEXT NOT NULL,
            watched_tickers TEXT NOT NULL DEFAULT '[]',
            signal_filters TEXT NOT NULL DEFAULT '[]',
            updated_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pipeline_executions (
            id TEXT PRIMARY KEY,
            pipeline_id TEXT NOT NULL,
            status TEXT NOT NULL,
            dispatch_key TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_executions_pipeline_status
            ON pipeline_executions (pipeline_id, status);

        CREATE UNIQUE INDEX IF NOT EXISTS uq_executions_non_terminal
            ON pipeline_executions (pipeline_id)
            WHERE status IN ('pending', 'running');

        CREATE TABLE IF NOT EXISTS execution_requests (
            id TEXT PRIMARY KEY,
            execution_id TEXT NOT NULL,
            pipeline_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            signal_ids TEXT NOT NULL,
            dispatch_key TEXT NOT NULL,
            triggered_at DATETIME NOT NULL
        );
        "#,
    )
    .execute(&pool)
    .await
    .map_err(|e| StoreError::InitError(e.to_string()))?;

    info!("Dispatch database ready at {}", path.display());
    Ok(pool)
}
