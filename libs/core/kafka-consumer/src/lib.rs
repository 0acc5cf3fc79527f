//! Kafka Consumer Loop
//!
//! A resilient consumption loop for Kafka topics. It keeps pulling messages,
//! hands each one to a user-supplied handler, and survives transient stream
//! errors until the shutdown signal fires.
//!
//! ## Features
//!
//! - **Injected capabilities**: `MessageReader`, `Handler` and `Sleeper` traits
//! - **Flat retry policy**: 10 consecutive read errors, then a 10s pause
//! - **Idle notices**: "partition at end" diagnostics rate-limited to one per 30s
//! - **At-most-once dispatch**: handler failures are logged and skipped
//! - **Fire-and-forget starters**: plain and SASL/TLS Kafka consumers
//! - **Metrics**: per-topic counters through the `metrics` facade, no-ops
//!   until the application installs a recorder
//!
//! ## Example
//!
//! ```rust,ignore
//! use kafka_consumer::{spawn_consumer, ConsumerConfig, LogHandler};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let config = ConsumerConfig::new(["localhost:9092"], "orders", "order_workers");
//! let handle = spawn_consumer(config, LogHandler::default(), shutdown_rx)?;
//!
//! // ... later
//! shutdown_tx.send(true)?;
//! handle.await?;
//! ```

mod config;
mod consumer;
mod error;
mod handler;
mod kafka;
mod message;
pub mod metrics;
mod reader;
mod retry;
mod sleeper;

pub use config::{ConsumerConfig, SecureConsumerConfig};
pub use consumer::{
    ConsumerLoop, run_consumer_loop, run_consumer_loop_with_sleeper, spawn_consumer,
    spawn_consumer_loop, spawn_secure_consumer,
};
pub use error::{ConsumerError, HandlerError, ReadError, ReadErrorClass};
pub use handler::{Handler, LogHandler, consume_message};
pub use kafka::KafkaReader;
pub use message::{Message, MessageId};
pub use reader::MessageReader;
pub use retry::{Backoff, EndOfStream, RetryPolicy, RetryState};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper};
