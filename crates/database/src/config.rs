use anyhow::Result;
use serde::Deserialize;

/// Connection settings of the remote ledger database.
#[derive(Deserialize, Debug, Clone)]
pub struct SurrealDbConfig {
    pub db_endpoint: String,
    pub db_user: String,
    #[serde(default)]
    pub db_pass: String,
    #[serde(default = "default_ledger_name")]
    pub db_namespace: String,
    #[serde(default = "default_ledger_name")]
    pub db_database: String,
}

fn default_ledger_name() -> String {
    "ledger".to_string()
}

impl SurrealDbConfig {
    /// Reads `DB_ENDPOINT`, `DB_USER`, `DB_PASS`, `DB_NAMESPACE`, `DB_DATABASE`.
    pub fn from_env() -> Result<Self> {
        Ok(envy::from_env::<SurrealDbConfig>()?)
    }
}
