//! Custodial Lightning ledger: per-user double-entry accounts, invoices and
//! the payment flow that moves funds between them and the node.

use std::sync::Arc;

use database::surrealdb::{Connection, Surreal};
use log::info;

use crate::{
    config::HubConfig,
    error::{LedgerError, Result},
    gateway::NetworkGateway,
    notifier::SubscriberRegistry,
    reporter::IncidentReporter,
    repository::transaction_repository::TransactionRepository,
    services::{
        invoice_service::InvoiceService, payment_service::PaymentService,
        settlement_service::SettlementService,
    },
};

pub mod config;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod notifier;
pub mod reporter;
pub mod repository;
pub mod services;
pub mod utils;

#[cfg(test)]
mod testing;

/// Services of the ledger wired over one database and one node.
pub struct LedgerHub<C>
where
    C: Connection,
{
    pub identity_pubkey: String,
    pub invoices: InvoiceService<C>,
    pub payments: Arc<PaymentService<C>>,
    pub settlements: Arc<SettlementService<C>>,
    pub subscribers: SubscriberRegistry,
    pub ledger: TransactionRepository<C>,
}

impl<C> LedgerHub<C>
where
    C: Connection,
{
    pub async fn new(
        db: Surreal<C>,
        gateway: Arc<dyn NetworkGateway>,
        reporter: Arc<dyn IncidentReporter>,
        config: HubConfig,
    ) -> Result<Self> {
        let identity_pubkey = gateway
            .identity_pubkey()
            .await
            .map_err(|err| LedgerError::Node(err.to_string()))?;
        info!("Ledger running on node {}", identity_pubkey);

        let subscribers = SubscriberRegistry::new(config.subscriber_mailbox_capacity);

        Ok(Self {
            invoices: InvoiceService::new(
                db.clone(),
                gateway.clone(),
                reporter.clone(),
                identity_pubkey.clone(),
                config.incoming_invoice_expiry_secs,
                config.keysend_expiry_secs,
            ),
            payments: Arc::new(PaymentService::new(
                db.clone(),
                gateway,
                reporter.clone(),
                identity_pubkey.clone(),
                config.fee_limit_sat,
            )),
            settlements: Arc::new(SettlementService::new(
                db.clone(),
                subscribers.clone(),
                reporter,
            )),
            subscribers,
            ledger: TransactionRepository::new(db),
            identity_pubkey,
        })
    }

    /// Spendable balance of `user_id`.
    pub async fn balance_of(&self, user_id: i64) -> Result<i64> {
        self.ledger.balance_of(user_id).await
    }
}
