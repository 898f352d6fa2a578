use async_trait::async_trait;
use kairos_core::dispatch::entity::{EnqueueAck, ExecutionRequest};
use kairos_core::dispatch::error::QueueError;
use kairos_core::dispatch::port::TaskQueue;
use kairos_core::stream::entity::{StreamPosition, StreamRecord};
use kairos_core::stream::error::StreamError;
use kairos_core::stream::port::SignalSource;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, error, info};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// # Summary
/// 基于 Kafka 消费组的信号流。
///
/// # Invariants
/// * 关闭自动提交，读位置只在批次处理完成后由 `commit` 显式提交。
/// * 提交的是"下一条待读取"的 offset，即最后处理的 offset + 1。
pub struct KafkaSignalSource {
    consumer: StreamConsumer,
    topic: String,
    poll_timeout: Duration,
}

impl KafkaSignalSource {
    pub fn new(
        brokers: &str,
        group_id: &str,
        topic: &str,
        poll_timeout: Duration,
    ) -> Result<Self, StreamError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;

        info!(topic, group_id, "Kafka signal consumer subscribed");
        Ok(Self {
            consumer,
            topic: topic.to_string(),
            poll_timeout,
        })
    }
}

#[async_trait]
impl SignalSource for KafkaSignalSource {
    async fn poll(&self) -> Result<Option<StreamRecord>, StreamError> {
        match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(StreamError::Unavailable(e.to_string())),
            Ok(Ok(message)) => Ok(Some(StreamRecord {
                position: StreamPosition {
                    partition: message.partition(),
                    offset: message.offset(),
                },
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
        }
    }

    async fn commit(&self, positions: &[StreamPosition]) -> Result<(), StreamError> {
        let mut tpl = TopicPartitionList::new();
        for pos in positions {
            tpl.add_partition_offset(&self.topic, pos.partition, Offset::Offset(pos.offset + 1))
                .map_err(|e| StreamError::Commit(e.to_string()))?;
        }
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| StreamError::Commit(e.to_string()))?;
        debug!(?positions, "Kafka offsets committed");
        Ok(())
    }

    async fn rewind(&self, positions: &[StreamPosition]) -> Result<(), StreamError> {
        for pos in positions {
            self.consumer
                .seek(&self.topic, pos.partition, Offset::Offset(pos.offset), SEEK_TIMEOUT)
                .map_err(|e| StreamError::Seek(e.to_string()))?;
        }
        Ok(())
    }
}

/// # Summary
/// 以 Kafka 主题作为执行任务队列。
///
/// # Invariants
/// * 消息键为流水线 ID，同一流水线的请求落在同一分区。
/// * Kafka 不提供入队时的比较并设置，结果总是 `Accepted`，
///   由执行层按 `dispatch_key` 做最终去重。
pub struct KafkaTaskQueue {
    producer: FutureProducer,
    topic: String,
}

impl KafkaTaskQueue {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, QueueError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl TaskQueue for KafkaTaskQueue {
    async fn enqueue(&self, request: &ExecutionRequest) -> Result<EnqueueAck, QueueError> {
        let payload =
            serde_json::to_string(request).map_err(|e| QueueError::Serialize(e.to_string()))?;

        self.producer
            .send(
                FutureRecord::to(&self.topic)
                    .key(&request.pipeline_id.0)
                    .payload(&payload),
                Timeout::After(SEND_TIMEOUT),
            )
            .await
            .map_err(|(e, _)| {
                error!("Failed to publish execution request to {}: {}", self.topic, e);
                QueueError::Unavailable(e.to_string())
            })?;
        Ok(EnqueueAck::Accepted)
    }
}
