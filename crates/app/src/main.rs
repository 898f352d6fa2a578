mod logging;
mod settings;

use kairos_cache::snapshot::SnapshotCache;
use kairos_core::config::{AppConfig, QueueBackend, StreamBackend};
use kairos_core::dispatch::port::TaskQueue;
use kairos_core::stream::port::SignalSource;
use kairos_dispatch::engine::DispatchEngine;
use kairos_store::execution::SqliteExecutionStore;
use kairos_store::queue::SqliteTaskQueue;
use kairos_store::subscription::SqliteSubscriptionSource;
use kairos_stream::jsonl::JsonlSignalSource;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

type BoxError = Box<dyn std::error::Error>;

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 按配置实例化具体适配器，通过 `Arc<dyn Trait>` 注入分发引擎。
///
/// # Logic
/// 1. 加载配置并初始化全局日志。
/// 2. 打开分发数据库，实例化订阅源、执行状态库与订阅缓存。
/// 3. 按后台配置实例化信号流与任务队列。
/// 4. 启动引擎，挂起等待外部退出信号或任一引擎例程退出，然后优雅关闭。
///    例程出错时 `shutdown` 返回该错误，进程以非零状态退出。
#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. 配置与日志
    let config_path = std::env::var(settings::CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(settings::DEFAULT_CONFIG_PATH));
    let config = settings::load(&config_path)?;
    let _log_guard = logging::init(&config.logging);
    info!(config = %config_path.display(), "Kairos dispatcher starting...");

    // 2. 存储层
    kairos_store::config::set_root_dir(PathBuf::from(&config.database.data_dir));
    let pool = kairos_store::db::connect().await?;
    let subscriptions = Arc::new(SqliteSubscriptionSource::new(pool.clone()));
    let executions = Arc::new(SqliteExecutionStore::new(pool.clone()));
    let cache = Arc::new(SnapshotCache::new(subscriptions));

    // 3. 信号流与任务队列
    let source = build_source(&config).await?;
    let queue = build_queue(&config, pool)?;

    // 4. 启动引擎（App 层知道具体实现，引擎只面向端口）
    let mut handle = DispatchEngine::new(config, cache, source, executions, queue)
        .start()
        .await;
    info!("Dispatch engine running. Waiting for signals...");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received. Draining...");
        }
        routine = handle.closed() => {
            error!(routine, "Engine routine stopped unexpectedly, shutting down");
        }
    }
    handle.shutdown().await?;
    Ok(())
}

async fn build_source(config: &AppConfig) -> Result<Arc<dyn SignalSource>, BoxError> {
    let poll_timeout = Duration::from_millis(config.stream.poll_timeout_ms);
    match config.stream.backend {
        StreamBackend::Jsonl => Ok(Arc::new(
            JsonlSignalSource::open(&config.stream.path, poll_timeout).await?,
        )),
        StreamBackend::Kafka => kafka::source(config, poll_timeout),
    }
}

fn build_queue(config: &AppConfig, pool: SqlitePool) -> Result<Arc<dyn TaskQueue>, BoxError> {
    match config.queue.backend {
        QueueBackend::Sqlite => Ok(Arc::new(SqliteTaskQueue::new(pool))),
        QueueBackend::Kafka => kafka::queue(config),
    }
}

#[cfg(feature = "kafka")]
mod kafka {
    use super::BoxError;
    use kairos_core::config::AppConfig;
    use kairos_core::dispatch::port::TaskQueue;
    use kairos_core::stream::port::SignalSource;
    use kairos_stream::kafka::{KafkaSignalSource, KafkaTaskQueue};
    use std::sync::Arc;
    use std::time::Duration;

    pub fn source(config: &AppConfig, poll_timeout: Duration) -> Result<Arc<dyn SignalSource>, BoxError> {
        let stream = &config.stream;
        Ok(Arc::new(KafkaSignalSource::new(
            &stream.brokers,
            &stream.group_id,
            &stream.topic,
            poll_timeout,
        )?))
    }

    pub fn queue(config: &AppConfig) -> Result<Arc<dyn TaskQueue>, BoxError> {
        Ok(Arc::new(KafkaTaskQueue::new(
            &config.stream.brokers,
            &config.queue.topic,
        )?))
    }
}

#[cfg(not(feature = "kafka"))]
mod kafka {
    use super::BoxError;
    use kairos_core::config::AppConfig;
    use kairos_core::dispatch::port::TaskQueue;
    use kairos_core::stream::port::SignalSource;
    use std::sync::Arc;
    use std::time::Duration;

    const DISABLED: &str = "kafka backend requires building kairos-app with `--features kafka`";

    pub fn source(_config: &AppConfig, _poll_timeout: Duration) -> Result<Arc<dyn SignalSource>, BoxError> {
        Err(DISABLED.into())
    }

    pub fn queue(_config: &AppConfig) -> Result<Arc<dyn TaskQueue>, BoxError> {
        Err(DISABLED.into())
    }
}
