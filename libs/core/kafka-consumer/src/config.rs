//! Consumer connection configuration
//!
//! `ConsumerConfig` holds the plain connection parameters. `SecureConsumerConfig`
//! adds SASL/SCRAM credentials and TLS settings on top of it.

use crate::error::ConsumerError;
use std::path::PathBuf;

/// Plain Kafka consumer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Bootstrap broker addresses (`host:port`)
    pub brokers: Vec<String>,

    /// Topic to consume
    pub topic: String,

    /// Consumer group id
    pub group_id: String,
}

impl ConsumerConfig {
    /// Create a new ConsumerConfig
    pub fn new<I, S>(brokers: I, topic: impl Into<String>, group_id: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            topic: topic.into(),
            group_id: group_id.into(),
        }
    }

    /// Brokers joined for `bootstrap.servers`
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Check that brokers, topic and group are present
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(ConsumerError::Config("at least one broker is required".into()));
        }
        if self.topic.trim().is_empty() {
            return Err(ConsumerError::Config("topic is required".into()));
        }
        if self.group_id.trim().is_empty() {
            return Err(ConsumerError::Config("group id is required".into()));
        }
        Ok(())
    }
}

/// Kafka consumer configuration with SASL/SCRAM-SHA-512 and optional TLS
#[derive(Clone, PartialEq, Eq)]
pub struct SecureConsumerConfig {
    /// Connection parameters
    pub consumer: ConsumerConfig,

    /// SASL username
    pub username: String,

    /// SASL password
    pub password: String,

    /// Use TLS for the broker connection
    pub use_ssl: bool,

    /// Skip broker certificate verification
    pub insecure_skip_verify: bool,

    /// CA certificate used to verify brokers
    pub ca_cert_path: Option<PathBuf>,
}

impl SecureConsumerConfig {
    /// Create a new SecureConsumerConfig with TLS disabled
    pub fn new(
        consumer: ConsumerConfig,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            consumer,
            username: username.into(),
            password: password.into(),
            use_ssl: false,
            insecure_skip_verify: false,
            ca_cert_path: None,
        }
    }

    /// Enable or disable TLS
    pub fn with_ssl(mut self, enable: bool) -> Self {
        self.use_ssl = enable;
        self
    }

    /// Enable or disable broker certificate verification
    pub fn with_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Set the CA certificate path
    pub fn with_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Check connection parameters and credentials.
    ///
    /// Credentials must be non-empty and free of control characters, which
    /// SCRAM's SASLprep profile prohibits.
    pub fn validate(&self) -> Result<(), ConsumerError> {
        self.consumer.validate()?;
        validate_credential("username", &self.username)?;
        validate_credential("password", &self.password)?;
        Ok(())
    }
}

impl std::fmt::Debug for SecureConsumerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureConsumerConfig")
            .field("consumer", &self.consumer)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_ssl", &self.use_ssl)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("ca_cert_path", &self.ca_cert_path)
            .finish()
    }
}

fn validate_credential(field: &str, value: &str) -> Result<(), ConsumerError> {
    if value.is_empty() {
        return Err(ConsumerError::InvalidCredentials(format!("{field} is empty")));
    }
    if value.chars().any(char::is_control) {
        return Err(ConsumerError::InvalidCredentials(format!(
            "{field} contains control characters"
        )));
    }
    Ok(())
}
