//! Events Worker Service
//!
//! A background worker that consumes one Kafka topic and logs each message.
//!
//! ## Architecture
//!
//! ```text
//! Kafka topic (KAFKA_TOPIC)
//!   ↓ (Consumer Group: KAFKA_GROUP_ID)
//! KafkaReader (plain or SASL/SCRAM + TLS)
//!   ↓
//! ConsumerLoop (count-then-pause backoff)
//!   ↓
//! LogHandler
//! ```
//!
//! The consumer runs detached; this service only waits for SIGINT/SIGTERM
//! and then flips the shutdown signal. Consumer counters are served in
//! Prometheus format on `METRICS_ADDR` (default `0.0.0.0:9090`).

use core_config::kafka::KafkaConfig;
use core_config::{Environment, FromEnv, env_or_default};
use eyre::{Result, WrapErr};
use kafka_consumer::{
    ConsumerConfig, ConsumerError, Handler, LogHandler, SecureConsumerConfig, spawn_consumer,
    spawn_secure_consumer,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Connection settings derived from the environment.
#[derive(Debug)]
pub enum ConsumerSettings {
    Plain(ConsumerConfig),
    Secure(SecureConsumerConfig),
}

impl TryFrom<KafkaConfig> for ConsumerSettings {
    type Error = ConsumerError;

    /// Secure when both credentials are set, plain when no security setting
    /// is given. Anything in between is rejected.
    fn try_from(config: KafkaConfig) -> Result<Self, Self::Error> {
        let consumer = ConsumerConfig::new(
            config.brokers.iter().cloned(),
            config.topic.clone(),
            config.group_id.clone(),
        );

        match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                let mut secure = SecureConsumerConfig::new(consumer, username, password)
                    .with_ssl(config.use_ssl)
                    .with_insecure_skip_verify(config.insecure_skip_verify);
                if let Some(ca) = &config.ca_cert_path {
                    secure = secure.with_ca_cert_path(ca.clone());
                }
                Ok(ConsumerSettings::Secure(secure))
            }
            (Some(_), None) | (None, Some(_)) => Err(ConsumerError::InvalidCredentials(
                "KAFKA_USERNAME and KAFKA_PASSWORD must be set together".to_string(),
            )),
            (None, None) => {
                if config.use_ssl || config.insecure_skip_verify || config.ca_cert_path.is_some() {
                    return Err(ConsumerError::Config(
                        "TLS settings require KAFKA_USERNAME and KAFKA_PASSWORD".to_string(),
                    ));
                }
                Ok(ConsumerSettings::Plain(consumer))
            }
        }
    }
}

impl ConsumerSettings {
    /// Start the matching consumer. Construction errors surface here.
    pub fn spawn<H: Handler + 'static>(
        self,
        handler: H,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, ConsumerError> {
        match self {
            ConsumerSettings::Plain(config) => spawn_consumer(config, handler, shutdown),
            ConsumerSettings::Secure(config) => spawn_secure_consumer(config, handler, shutdown),
        }
    }
}

/// Run the events worker
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev)
/// 2. Installs the Prometheus exporter
/// 3. Loads Kafka settings from the environment
/// 4. Starts the consumer (secure when credentials are present)
/// 5. Waits for a shutdown signal and lets the consumer drain
///
/// # Errors
///
/// Returns an error if the metrics address or Kafka configuration is
/// missing or invalid, or if the consumer cannot be created.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting events worker service"
    );

    init_metrics(metrics_addr()?)?;

    let kafka_config = KafkaConfig::from_env().wrap_err("Failed to load Kafka configuration")?;
    info!(config = ?kafka_config, "Kafka configuration loaded");

    let settings =
        ConsumerSettings::try_from(kafka_config).wrap_err("Invalid Kafka security settings")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = settings
        .spawn(LogHandler, shutdown_rx)
        .wrap_err("Failed to start Kafka consumer")?;

    if let Err(e) = shutdown_signal().await {
        error!("Error waiting for shutdown signal: {}", e);
    }
    let _ = shutdown_tx.send(true);

    consumer.await.wrap_err("Kafka consumer task failed")?;

    info!("Events worker service stopped");
    Ok(())
}

/// Address for the Prometheus scrape endpoint (`METRICS_ADDR`)
fn metrics_addr() -> Result<SocketAddr> {
    let raw = env_or_default("METRICS_ADDR", DEFAULT_METRICS_ADDR);
    raw.parse::<SocketAddr>()
        .wrap_err_with(|| format!("Invalid METRICS_ADDR '{}'", raw))
}

/// Install the Prometheus recorder and its HTTP listener
fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .wrap_err("Failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
