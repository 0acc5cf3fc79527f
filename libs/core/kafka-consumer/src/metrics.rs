//! Consumer loop metrics
//!
//! Counters go through the `metrics` facade. They are no-ops until the
//! application installs a recorder (the events worker installs the
//! Prometheus exporter).

use crate::error::ReadErrorClass;
use metrics::counter;

/// Metrics helper owned by one consumer loop, labelled by its topic.
#[derive(Debug, Clone)]
pub struct ConsumerMetrics {
    topic: String,
}

impl ConsumerMetrics {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Record a message read from the stream
    pub fn message_received(&self, partition: i32) {
        counter!(
            "kafka_consumer_messages_received_total",
            "topic" => self.topic.clone(),
            "partition" => partition.to_string()
        )
        .increment(1);
    }

    /// Record a handler returning an error
    pub fn handler_failed(&self) {
        counter!(
            "kafka_consumer_handler_failures_total",
            "topic" => self.topic.clone()
        )
        .increment(1);
    }

    /// Record a read error by class
    pub fn read_error(&self, class: ReadErrorClass) {
        counter!(
            "kafka_consumer_read_errors_total",
            "topic" => self.topic.clone(),
            "class" => class.as_ref().to_string()
        )
        .increment(1);
    }

    /// Record a backoff pause, labelled by the error class that triggered it
    pub fn backoff(&self, class: ReadErrorClass) {
        counter!(
            "kafka_consumer_backoffs_total",
            "topic" => self.topic.clone(),
            "class" => class.as_ref().to_string()
        )
        .increment(1);
    }
}
