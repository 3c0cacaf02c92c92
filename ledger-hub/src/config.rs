use anyhow::Result;
use dotenv::dotenv;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct HubConfig {
    /// Fixed routing fee ceiling for outgoing payments, in satoshis.
    #[serde(default = "default_fee_limit_sat")]
    pub fee_limit_sat: i64,
    #[serde(default = "default_incoming_invoice_expiry_secs")]
    pub incoming_invoice_expiry_secs: i64,
    #[serde(default = "default_keysend_expiry_secs")]
    pub keysend_expiry_secs: i64,
    #[serde(default = "default_subscriber_mailbox_capacity")]
    pub subscriber_mailbox_capacity: usize,
    #[serde(default = "default_settlement_queue")]
    pub settlement_queue: String,
}

fn default_fee_limit_sat() -> i64 {
    300
}

fn default_incoming_invoice_expiry_secs() -> i64 {
    24 * 60 * 60
}

fn default_keysend_expiry_secs() -> i64 {
    60 * 60
}

fn default_subscriber_mailbox_capacity() -> usize {
    1
}

fn default_settlement_queue() -> String {
    "ledger.invoice_updates".to_string()
}

impl HubConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Ok(envy::from_env::<HubConfig>()?)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            fee_limit_sat: default_fee_limit_sat(),
            incoming_invoice_expiry_secs: default_incoming_invoice_expiry_secs(),
            keysend_expiry_secs: default_keysend_expiry_secs(),
            subscriber_mailbox_capacity: default_subscriber_mailbox_capacity(),
            settlement_queue: default_settlement_queue(),
        }
    }
}
