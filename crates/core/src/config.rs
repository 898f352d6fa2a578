use serde::{Deserialize, Serialize};
use thiserror::Error;

/// # Summary
/// 配置校验错误。
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid config `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub gate: GateConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// 信号流后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamBackend {
    Jsonl,
    Kafka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub backend: StreamBackend,
    // JSON-lines 日志文件路径
    pub path: String,
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    // 达到该数量立即放行
    pub size_threshold: usize,
    // 自窗口内第一条信号起的最长等待
    pub window_ms: u64,
    // 等待处理的批次数上限，满则入口暂停拉取
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub data_dir: String,
}

/// 任务队列后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Sqlite,
    Kafka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub topic: String,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub retry: RetryConfig,
}

/// 有界指数退避参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    // 包含首次尝试在内的总次数
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    // 为空时只输出到标准输出
    pub dir: Option<String>,
    pub file_prefix: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backend: StreamBackend::Jsonl,
            path: "data/signals.jsonl".to_string(),
            brokers: "localhost:9092".to_string(),
            topic: "signals".to_string(),
            group_id: "kairos-dispatch".to_string(),
            poll_timeout_ms: 1000,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size_threshold: 20,
            window_ms: 500,
            channel_capacity: 1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Sqlite,
            topic: "pipeline-executions".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 50,
                max_delay_ms: 1000,
                multiplier: 2.0,
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file_prefix: "kairos.log".to_string(),
        }
    }
}

impl AppConfig {
    /// # Summary
    /// 校验配置取值。
    ///
    /// # Logic
    /// 检查批次阈值、窗口、拉取超时、刷新间隔、通道容量与各重试参数的下限。
    ///
    /// # Returns
    /// 第一个不合法的字段对应的 `ConfigError`。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.batch.size_threshold == 0 {
            return invalid("batch.size_threshold", "must be at least 1");
        }
        if self.batch.window_ms == 0 {
            return invalid("batch.window_ms", "must be at least 1");
        }
        if self.batch.channel_capacity == 0 {
            return invalid("batch.channel_capacity", "must be at least 1");
        }
        // 为 0 时拉取立即返回，入口会空转
        if self.stream.poll_timeout_ms == 0 {
            return invalid("stream.poll_timeout_ms", "must be at least 1");
        }
        if self.cache.refresh_interval_secs == 0 {
            return invalid("cache.refresh_interval_secs", "must be at least 1");
        }
        if self.metrics.report_interval_secs == 0 {
            return invalid("metrics.report_interval_secs", "must be at least 1");
        }
        self.queue.retry.validate("queue.retry")?;
        self.gate.retry.validate("gate.retry")?;
        Ok(())
    }
}

impl RetryConfig {
    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field,
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field,
                reason: "multiplier must be >= 1.0".to_string(),
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::Invalid {
                field,
                reason: "max_delay_ms must not be below initial_delay_ms".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.batch.size_threshold, 20);
        assert_eq!(config.batch.window_ms, 500);
        assert_eq!(config.cache.refresh_interval_secs, 30);
        assert_eq!(config.stream.backend, StreamBackend::Jsonl);
        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert_eq!(config.database.data_dir, "data");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = AppConfig::default();
        config.batch.size_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "batch.size_threshold", .. })
        ));

        let mut config = AppConfig::default();
        config.gate.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "gate.retry", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_poll_timeout() {
        let mut config = AppConfig::default();
        config.stream.poll_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "stream.poll_timeout_ms", .. })
        ));

        config.stream.poll_timeout_ms = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"batch": {"size_threshold": 50}, "stream": {"backend": "kafka"}}"#)
                .unwrap();
        assert_eq!(config.batch.size_threshold, 50);
        assert_eq!(config.batch.window_ms, 500);
        assert_eq!(config.stream.backend, StreamBackend::Kafka);
        assert_eq!(config.stream.topic, "signals");
    }
}
