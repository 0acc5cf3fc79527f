//! Messages read from a Kafka partition.

use chrono::{DateTime, Utc};
use std::fmt;

/// Identity of a message within the log: `(topic, partition, offset)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// A message pulled from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message key (absent for unkeyed messages)
    pub key: Option<Vec<u8>>,
    /// Message payload
    pub value: Vec<u8>,
    /// Topic the message was read from
    pub topic: String,
    /// Partition index
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Broker or producer timestamp, if the client reported one
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a message without key or timestamp.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            key: None,
            value: value.into(),
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
        }
    }

    /// Set the key
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Key bytes, empty when the message is unkeyed.
    pub fn key_bytes(&self) -> &[u8] {
        self.key.as_deref().unwrap_or_default()
    }

    pub fn id(&self) -> MessageId {
        MessageId {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}
