use std::sync::Arc;

use anyhow::Result;
use database::config::SurrealDbConfig;
use dotenv::dotenv;
use events::{config::RabbitMqConfig, node_events::LightningNodeEvents};
use ledger_hub::{
    config::HubConfig, notifier::SubscriberRegistry, reporter::LogReporter,
    services::settlement_service::SettlementService,
};
use log::info;

/// Standalone settlement watcher: funds users as the node reports their
/// invoices settled.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = HubConfig::from_env()?;
    let db = database::init_db(SurrealDbConfig::from_env()?).await?;
    let events = LightningNodeEvents::new(RabbitMqConfig::from_env()?).await?;

    info!("Starting settlement watcher...");

    let settlements = Arc::new(SettlementService::new(
        db,
        SubscriberRegistry::new(config.subscriber_mailbox_capacity),
        Arc::new(LogReporter),
    ));
    settlements.subscribe(events, config.settlement_queue.clone());

    tokio::signal::ctrl_c().await?;
    info!("Settlement watcher stopped");

    Ok(())
}
