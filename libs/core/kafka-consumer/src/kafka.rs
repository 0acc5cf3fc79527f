//! Kafka-backed message reader
//!
//! Wraps an rdkafka `StreamConsumer` subscribed to a single topic. The
//! client is configured to start from the earliest offset, auto-commit once
//! a second, and report partition EOF so the loop can tell "caught up" apart
//! from real failures.

use crate::config::{ConsumerConfig, SecureConsumerConfig};
use crate::error::{ConsumerError, ReadError};
use crate::message::Message;
use crate::reader::MessageReader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::Message as _;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use tokio::sync::watch;
use tracing::{debug, info};

const SASL_MECHANISM: &str = "SCRAM-SHA-512";

/// Build the client configuration shared by plain and secure readers.
pub(crate) fn client_config(config: &ConsumerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("group.id", &config.group_id)
        // Offset management
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", "1000")
        // Fetch sizing
        .set("fetch.min.bytes", "10000")
        .set("fetch.max.bytes", "10000000")
        .set("fetch.wait.max.ms", "500")
        // Surface head-of-partition as an error the loop can classify
        .set("enable.partition.eof", "true");
    client_config
}

/// Build the client configuration for SASL/SCRAM, with TLS if enabled.
pub(crate) fn secure_client_config(
    config: &SecureConsumerConfig,
) -> Result<ClientConfig, ConsumerError> {
    config.validate()?;

    let mut client_config = client_config(&config.consumer);
    client_config
        .set("sasl.mechanism", SASL_MECHANISM)
        .set("sasl.username", &config.username)
        .set("sasl.password", &config.password)
        .set("socket.connection.setup.timeout.ms", "10000");

    if config.use_ssl {
        info!("Enabling SSL/TLS for Kafka connection");
        client_config.set("security.protocol", "sasl_ssl");

        if config.insecure_skip_verify {
            client_config.set("enable.ssl.certificate.verification", "false");
        }
        if let Some(ca) = &config.ca_cert_path {
            client_config.set("ssl.ca.location", ca.to_string_lossy());
        }
    } else {
        client_config.set("security.protocol", "sasl_plaintext");
    }

    Ok(client_config)
}

/// Message reader backed by an rdkafka `StreamConsumer`.
pub struct KafkaReader {
    consumer: StreamConsumer,
    topic: String,
    closed: bool,
}

impl KafkaReader {
    /// Create a reader from plain connection parameters.
    pub fn new(config: &ConsumerConfig) -> Result<Self, ConsumerError> {
        config.validate()?;
        Self::subscribe(client_config(config), &config.topic)
    }

    /// Create a reader authenticating with SASL/SCRAM-SHA-512.
    pub fn new_secure(config: &SecureConsumerConfig) -> Result<Self, ConsumerError> {
        let client_config = secure_client_config(config)?;
        Self::subscribe(client_config, &config.consumer.topic)
    }

    fn subscribe(client_config: ClientConfig, topic: &str) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        info!(topic = %topic, "Kafka reader subscribed");

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            closed: false,
        })
    }

    /// Get the underlying consumer (for advanced usage)
    pub fn inner(&self) -> &StreamConsumer {
        &self.consumer
    }
}

#[async_trait]
impl MessageReader for KafkaReader {
    async fn read(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<Message, ReadError> {
        if self.closed {
            return Err(ReadError::Closed);
        }

        loop {
            if *shutdown.borrow_and_update() {
                return Err(ReadError::Canceled);
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // A dropped sender can never signal again, treat it as shutdown
                    if changed.is_err() {
                        return Err(ReadError::Canceled);
                    }
                }

                received = self.consumer.recv() => {
                    return match received {
                        Ok(message) => Ok(to_message(&message)),
                        Err(e) => Err(ReadError::from_kafka(e, &self.topic)),
                    };
                }
            }
        }
    }

    fn close(&mut self) -> Result<(), ReadError> {
        if self.closed {
            return Ok(());
        }

        self.consumer.unsubscribe();
        self.closed = true;
        debug!(topic = %self.topic, "Kafka reader closed");
        Ok(())
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

fn to_message(message: &BorrowedMessage<'_>) -> Message {
    Message {
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}
