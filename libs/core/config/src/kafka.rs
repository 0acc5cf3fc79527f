use crate::{ConfigError, FromEnv, env_bool, env_optional, env_required};
use std::path::PathBuf;

/// Kafka consumer connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_ssl: bool,
    pub insecure_skip_verify: bool,
    pub ca_cert_path: Option<PathBuf>,
}

impl KafkaConfig {
    pub fn new(brokers: Vec<String>, topic: String, group_id: String) -> Self {
        Self {
            brokers,
            topic,
            group_id,
            username: None,
            password: None,
            use_ssl: false,
            insecure_skip_verify: false,
            ca_cert_path: None,
        }
    }

    /// SASL credentials, when both username and password are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

impl FromEnv for KafkaConfig {
    /// Requires KAFKA_BROKERS (comma separated), KAFKA_TOPIC and KAFKA_GROUP_ID.
    /// Optional: KAFKA_USERNAME, KAFKA_PASSWORD, KAFKA_USE_SSL,
    /// KAFKA_INSECURE_SKIP_VERIFY, KAFKA_CA_CERT_PATH
    fn from_env() -> Result<Self, ConfigError> {
        let brokers: Vec<String> = env_required("KAFKA_BROKERS")?
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(String::from)
            .collect();

        if brokers.is_empty() {
            return Err(ConfigError::ParseError {
                key: "KAFKA_BROKERS".to_string(),
                details: "no broker addresses given".to_string(),
            });
        }

        Ok(Self {
            brokers,
            topic: env_required("KAFKA_TOPIC")?,
            group_id: env_required("KAFKA_GROUP_ID")?,
            username: env_optional("KAFKA_USERNAME"),
            password: env_optional("KAFKA_PASSWORD"),
            use_ssl: env_bool("KAFKA_USE_SSL", false)?,
            insecure_skip_verify: env_bool("KAFKA_INSECURE_SKIP_VERIFY", false)?,
            ca_cert_path: env_optional("KAFKA_CA_CERT_PATH").map(PathBuf::from),
        })
    }
}

impl std::fmt::Debug for KafkaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaConfig")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("use_ssl", &self.use_ssl)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("ca_cert_path", &self.ca_cert_path)
            .finish()
    }
}
