//! Consumer error types and read error classification
//!
//! Read errors fall into three classes that drive the loop:
//! - **Cancellation**: shutdown was requested, the loop stops
//! - **EndOfStream**: caught up to the head of a partition, counted quietly
//! - **Other**: network or protocol failure, logged and counted

use rdkafka::error::KafkaError;
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Class of a read error for determining loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ReadErrorClass {
    /// Shutdown signal fired or a deadline elapsed - stop the loop
    Cancellation,
    /// No new message available yet - re-poll, pause after the threshold
    EndOfStream,
    /// Any other failure - log, re-poll, pause after the threshold
    Other,
}

/// Errors returned by a `MessageReader`
#[derive(Error, Debug)]
pub enum ReadError {
    /// The shutdown signal fired while reading
    #[error("read canceled")]
    Canceled,

    /// The read deadline elapsed
    #[error("read deadline exceeded")]
    DeadlineExceeded,

    /// Caught up to the end of a partition
    #[error("end of partition {partition} on topic '{topic}'")]
    EndOfPartition { topic: String, partition: i32 },

    /// Kafka client error
    #[error("Kafka error: {0}")]
    Kafka(#[source] KafkaError),

    /// The reader was already closed
    #[error("reader is closed")]
    Closed,

    /// Any other reader failure
    #[error("{0}")]
    Other(String),
}

impl ReadError {
    /// Wrap a Kafka client error, turning partition EOF into `EndOfPartition`
    pub fn from_kafka(err: KafkaError, topic: &str) -> Self {
        match err {
            KafkaError::PartitionEOF(partition) => ReadError::EndOfPartition {
                topic: topic.to_string(),
                partition,
            },
            other => ReadError::Kafka(other),
        }
    }

    /// Create an uncategorized read error
    pub fn other(message: impl Into<String>) -> Self {
        ReadError::Other(message.into())
    }

    /// Get the class of this error
    pub fn class(&self) -> ReadErrorClass {
        match self {
            ReadError::Canceled | ReadError::DeadlineExceeded => ReadErrorClass::Cancellation,
            ReadError::EndOfPartition { .. } => ReadErrorClass::EndOfStream,
            ReadError::Kafka(KafkaError::PartitionEOF(_)) => ReadErrorClass::EndOfStream,
            ReadError::Kafka(_) | ReadError::Closed | ReadError::Other(_) => ReadErrorClass::Other,
        }
    }

    /// Check if this error should stop the loop
    pub fn is_cancellation(&self) -> bool {
        self.class() == ReadErrorClass::Cancellation
    }

    /// Check if this error only means "no new messages yet"
    pub fn is_end_of_stream(&self) -> bool {
        self.class() == ReadErrorClass::EndOfStream
    }
}

/// Errors returned by a `Handler`
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The message could not be processed
    #[error("{0}")]
    Failed(String),

    /// Error raised by the handler's own dependencies
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Create a processing failure
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Construction-time errors, reported before the loop starts
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Invalid consumer configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed SASL credentials
    #[error("Invalid SASL credentials: {0}")]
    InvalidCredentials(String),

    /// Kafka client could not be created or subscribed
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}
