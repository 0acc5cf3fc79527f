//! Events Worker Service - Entry Point
//!
//! Background worker that consumes a Kafka topic and logs every message.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    events_worker::run().await
}
