use anyhow::Result;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct RabbitMqConfig {
    pub rabbitmq_host: String,
    #[serde(default = "default_rabbitmq_port")]
    pub rabbitmq_port: u16,
    pub rabbitmq_username: String,
    pub rabbitmq_password: String,
    /// Fanout exchange the Lightning node publishes its events to.
    #[serde(default = "default_lightning_node_exchange")]
    pub lightning_node_exchange: String,
    /// Unacknowledged deliveries a consumer may hold at once.
    #[serde(default = "default_rabbitmq_prefetch")]
    pub rabbitmq_prefetch: u16,
}

fn default_rabbitmq_port() -> u16 {
    5672
}

fn default_lightning_node_exchange() -> String {
    "lightning_node_events".to_string()
}

fn default_rabbitmq_prefetch() -> u16 {
    16
}

impl RabbitMqConfig {
    pub fn from_env() -> Result<Self> {
        Ok(envy::from_env::<RabbitMqConfig>()?)
    }
}
