use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// A fetched record, detached from the consumer that produced it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Partitioned log the ingestion loop reads from.
///
/// Nothing is acknowledged until `commit`; an uncommitted message comes back
/// after a restart, or immediately after `rewind`.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits for the next message. Dropping the future loses nothing.
    async fn fetch(&mut self) -> Result<InboundMessage, SourceError>;

    /// Marks `message` and everything before it on its partition as done.
    async fn commit(&mut self, message: &InboundMessage) -> Result<(), SourceError>;

    /// Repositions the partition so `message` is the next one fetched.
    async fn rewind(&mut self, message: &InboundMessage) -> Result<(), SourceError>;
}

pub struct KafkaSource {
    consumer: StreamConsumer,
    seek_timeout: Duration,
}

impl KafkaSource {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", group_id)
            .set("bootstrap.servers", brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[topic])?;

        Ok(Self {
            consumer,
            seek_timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn fetch(&mut self) -> Result<InboundMessage, SourceError> {
        let message = self.consumer.recv().await?;

        Ok(InboundMessage {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().unwrap_or_default().to_vec(),
        })
    }

    async fn commit(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    async fn rewind(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        // seek blocks until librdkafka acknowledges it.
        tokio::task::block_in_place(|| {
            self.consumer.seek(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset),
                self.seek_timeout,
            )
        })?;
        Ok(())
    }
}
