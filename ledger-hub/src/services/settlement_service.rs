use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use database::surrealdb::{Connection, Surreal};
use events::node_events::{InvoiceUpdateProcessor, LightningNodeEvents};
use log::{debug, error, info, warn};

use crate::{
    entity::{AccountKind, Invoice, TransactionEntry},
    error::{LedgerError, Result},
    notifier::SubscriberRegistry,
    reporter::IncidentReporter,
    repository::{
        account_repository::AccountRepository, invoice_repository::InvoiceRepository,
        transaction_repository::TransactionRepository,
    },
};

/// Applies settlements of our own invoices reported by the node.
pub struct SettlementService<C>
where
    C: Connection,
{
    accounts: AccountRepository<C>,
    ledger: TransactionRepository<C>,
    invoices: InvoiceRepository<C>,
    registry: SubscriberRegistry,
    reporter: Arc<dyn IncidentReporter>,
}

impl<C> SettlementService<C>
where
    C: Connection,
{
    pub fn new(
        db: Surreal<C>,
        registry: SubscriberRegistry,
        reporter: Arc<dyn IncidentReporter>,
    ) -> Self {
        Self {
            accounts: AccountRepository::new(db.clone()),
            ledger: TransactionRepository::new(db.clone()),
            invoices: InvoiceRepository::new(db),
            registry,
            reporter,
        }
    }

    /// Settles the open incoming invoice with `payment_hash`, funds its owner
    /// and pushes it to the owner's live stream.
    ///
    /// Returns `None` for updates that change nothing: unsettled updates,
    /// unknown hashes and redeliveries of an already settled invoice.
    pub async fn process_invoice_update(
        &self,
        payment_hash: &str,
        settled: bool,
        amount_paid_sat: i64,
    ) -> Result<Option<Invoice>> {
        if !settled {
            debug!("Invoice {} updated, not settled", payment_hash);
            return Ok(None);
        }

        let claimed = self
            .invoices
            .settle_open_incoming_by_hash(payment_hash)
            .await
            .map_err(|err| {
                if err.is_store() {
                    self.reporter.capture_error("claiming settled invoice", &err);
                }
                err
            })?;
        let invoice = match claimed {
            Some(invoice) => invoice,
            None => {
                debug!("No open invoice for settled hash {}", payment_hash);
                return Ok(None);
            }
        };

        let amount = if invoice.amount == 0 {
            amount_paid_sat
        } else {
            invoice.amount
        };

        if amount > 0 {
            if let Err(err) = self.fund(&invoice, amount).await {
                self.reporter.capture_error("funding settled invoice", &err);
                if let Err(reopen_err) = self.invoices.reopen(&invoice).await {
                    self.reporter
                        .capture_error("reopening settled invoice", &reopen_err);
                }
                return Err(err);
            }
        } else {
            warn!("Settled invoice {} carries no amount", payment_hash);
        }

        info!(
            "Invoice settled user_id:{} amount:{} r_hash:{}",
            invoice.user_id, amount, payment_hash
        );
        self.registry.publish(&invoice);

        Ok(Some(invoice))
    }

    async fn fund(&self, invoice: &Invoice, amount: i64) -> Result<TransactionEntry> {
        let invoice_key = match invoice.key() {
            Some(key) => key,
            None => return Err(LedgerError::NotFound("invoice without id".to_string())),
        };
        let current = self
            .accounts
            .account_for(invoice.user_id, AccountKind::Current)
            .await?;
        let incoming = self
            .accounts
            .account_for(invoice.user_id, AccountKind::Incoming)
            .await?;

        self.ledger
            .record_entry(TransactionEntry::new(
                invoice.user_id,
                invoice_key,
                &current,
                &incoming,
                amount,
            ))
            .await
    }

    pub fn subscribe(self: Arc<Self>, events: LightningNodeEvents, queue: String) {
        tokio::spawn(async move {
            info!("Subscribing invoice updates");

            if let Err(err) = events
                .subscribe_invoice_updates(&queue, InvoiceUpdateCallback { service: self })
                .await
            {
                error!("Invoice updates subscription failed: {}", err);
            }

            warn!("Subscribing invoice updates end!");
        });
    }
}

/// Bridges broker deliveries to [`SettlementService`].
pub struct InvoiceUpdateCallback<C>
where
    C: Connection,
{
    pub service: Arc<SettlementService<C>>,
}

#[async_trait]
impl<C> InvoiceUpdateProcessor for InvoiceUpdateCallback<C>
where
    C: Connection,
{
    async fn invoice_updated(
        &self,
        payment_hash: String,
        settled: bool,
        amount_paid_sat: i64,
    ) -> AnyResult<()> {
        self.service
            .process_invoice_update(&payment_hash, settled, amount_paid_sat)
            .await?;
        Ok(())
    }
}
