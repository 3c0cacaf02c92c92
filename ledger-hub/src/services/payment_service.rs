use std::sync::Arc;

use chrono::Utc;
use database::surrealdb::{sql::Datetime, Connection, Surreal};
use log::{error, info, warn};

use crate::{
    entity::{AccountKind, Invoice, InvoiceState, InvoiceType, TransactionEntry},
    error::{LedgerError, Result},
    gateway::{
        KeysendPaymentRequest, NetworkGateway, StandardPaymentRequest, KEYSEND_CUSTOM_RECORD,
        TLV_ONION_REQ,
    },
    reporter::IncidentReporter,
    repository::{
        account_repository::AccountRepository, invoice_repository::InvoiceRepository,
        transaction_repository::TransactionRepository,
    },
    utils,
};

/// Proof of a completed payment, internal or routed.
#[derive(Debug, Clone)]
struct SentPayment {
    preimage: Vec<u8>,
    payment_hash: Vec<u8>,
    fee: i64,
}

pub struct PaymentService<C>
where
    C: Connection,
{
    accounts: AccountRepository<C>,
    ledger: TransactionRepository<C>,
    invoices: InvoiceRepository<C>,
    gateway: Arc<dyn NetworkGateway>,
    reporter: Arc<dyn IncidentReporter>,
    identity_pubkey: String,
    fee_limit_sat: i64,
}

impl<C> PaymentService<C>
where
    C: Connection,
{
    pub fn new(
        db: Surreal<C>,
        gateway: Arc<dyn NetworkGateway>,
        reporter: Arc<dyn IncidentReporter>,
        identity_pubkey: String,
        fee_limit_sat: i64,
    ) -> Self {
        Self {
            accounts: AccountRepository::new(db.clone()),
            ledger: TransactionRepository::new(db.clone()),
            invoices: InvoiceRepository::new(db),
            gateway,
            reporter,
            identity_pubkey,
            fee_limit_sat,
        }
    }

    /// Pays a stored outgoing invoice.
    ///
    /// The stored row is claimed first, moving it from initialized to open,
    /// so one invoice is paid at most once. The principal entry then doubles
    /// as the balance check, nothing reaches the network when it is refused.
    /// Routing and the reconciliation that follows run on their own task, so
    /// dropping the returned future does not abandon a payment in flight.
    pub async fn pay_invoice(self: &Arc<Self>, invoice: Invoice) -> Result<Invoice> {
        if invoice.invoice_type != InvoiceType::Outgoing || invoice.state.is_terminal() {
            return Err(LedgerError::InvalidState(invoice.state));
        }
        if invoice.amount <= 0 {
            return Err(LedgerError::InvalidAmount(invoice.amount));
        }
        let invoice_key = match invoice.key() {
            Some(key) => key,
            None => return Err(LedgerError::NotFound("invoice without id".to_string())),
        };

        let invoice = self
            .claim_invoice(&invoice_key)
            .await
            .map_err(|err| self.report_store("claiming invoice", err))?;

        let principal = match self.record_principal(&invoice, invoice_key.clone()).await {
            Ok(principal) => principal,
            Err(err) => {
                let err = self.report_store("recording payment", err);
                if let Err(release_err) =
                    self.invoices.release_outgoing_payment(&invoice_key).await
                {
                    error!(
                        "Could not release unpaid invoice {}: {}",
                        invoice_key, release_err
                    );
                    self.reporter
                        .capture_error("releasing unpaid invoice", &release_err);
                }
                return Err(err);
            }
        };

        info!(
            "Paying invoice user_id:{} amount:{} destination:{}",
            invoice.user_id, invoice.amount, invoice.destination_pubkey
        );

        let this = Arc::clone(self);
        let payment = tokio::spawn(async move { this.complete_payment(invoice, principal).await });

        match payment.await {
            Ok(res) => res,
            Err(err) => {
                error!("Payment task died: {}", err);
                Err(LedgerError::PaymentFailed(format!("payment task died: {}", err)))
            }
        }
    }

    /// Stored invoice, moved to open. A row somebody else already claimed
    /// yields its current state as `InvalidState`.
    async fn claim_invoice(&self, invoice_key: &str) -> Result<Invoice> {
        if let Some(claimed) = self.invoices.begin_outgoing_payment(invoice_key).await? {
            return Ok(claimed);
        }

        match self.invoices.get(invoice_key).await? {
            Some(stored) => Err(LedgerError::InvalidState(stored.state)),
            None => Err(LedgerError::NotFound(format!("invoice {}", invoice_key))),
        }
    }

    async fn record_principal(
        &self,
        invoice: &Invoice,
        invoice_key: String,
    ) -> Result<TransactionEntry> {
        let current = self
            .accounts
            .account_for(invoice.user_id, AccountKind::Current)
            .await?;
        let outgoing = self
            .accounts
            .account_for(invoice.user_id, AccountKind::Outgoing)
            .await?;

        self.ledger
            .record_entry(TransactionEntry::new(
                invoice.user_id,
                invoice_key,
                &outgoing,
                &current,
                invoice.amount,
            ))
            .await
    }

    async fn complete_payment(
        &self,
        mut invoice: Invoice,
        principal: TransactionEntry,
    ) -> Result<Invoice> {
        let sent = if invoice.destination_pubkey == self.identity_pubkey {
            self.send_internal_payment(&invoice).await
        } else {
            self.send_payment_sync(&mut invoice).await
        };

        match sent {
            Ok(sent) => {
                invoice.preimage = hex::encode(&sent.preimage);
                invoice.fee = sent.fee;
                self.handle_successful_payment(&mut invoice, &principal).await;
                info!(
                    "Paid invoice user_id:{} amount:{} fee:{} r_hash:{}",
                    invoice.user_id,
                    invoice.amount,
                    invoice.fee,
                    hex::encode(&sent.payment_hash)
                );
                Ok(invoice)
            }
            Err(err) => {
                let err = self.report_store("sending payment", err);
                self.handle_failed_payment(&mut invoice, &principal, &err).await;
                Err(err)
            }
        }
    }

    /// Settles a payment to one of our own invoices by moving funds inside
    /// the ledger. The open recipient invoice is claimed first so it can only
    /// be paid once.
    async fn send_internal_payment(&self, invoice: &Invoice) -> Result<SentPayment> {
        let recipient = match self
            .invoices
            .settle_open_incoming_by_request(&invoice.payment_request, true)
            .await?
        {
            Some(recipient) => recipient,
            None => {
                return Err(LedgerError::NotFound(format!(
                    "open invoice {}",
                    invoice.payment_request
                )))
            }
        };

        match self.credit_recipient(&recipient, invoice.amount).await {
            Ok(preimage) => {
                info!(
                    "Internal payment from user {} to user {} amount:{}",
                    invoice.user_id, recipient.user_id, invoice.amount
                );
                Ok(SentPayment {
                    payment_hash: utils::payment_hash(&preimage).to_vec(),
                    preimage,
                    fee: 0,
                })
            }
            Err(err) => {
                if let Err(reopen_err) = self.invoices.reopen(&recipient).await {
                    self.reporter
                        .capture_error("reopening internal invoice", &reopen_err);
                }
                Err(err)
            }
        }
    }

    async fn credit_recipient(&self, recipient: &Invoice, amount: i64) -> Result<Vec<u8>> {
        let preimage = hex::decode(&recipient.preimage).map_err(|err| {
            LedgerError::Store(format!(
                "stored preimage of {} is corrupt: {}",
                recipient.r_hash, err
            ))
        })?;
        let recipient_key = match recipient.key() {
            Some(key) => key,
            None => return Err(LedgerError::NotFound("invoice without id".to_string())),
        };

        let current = self
            .accounts
            .account_for(recipient.user_id, AccountKind::Current)
            .await?;
        let incoming = self
            .accounts
            .account_for(recipient.user_id, AccountKind::Incoming)
            .await?;

        self.ledger
            .record_entry(TransactionEntry::new(
                recipient.user_id,
                recipient_key,
                &current,
                &incoming,
                amount,
            ))
            .await?;

        Ok(preimage)
    }

    /// Routes the payment through the node. Keysend payments get a fresh
    /// preimage whose hash becomes the invoice's payment hash.
    async fn send_payment_sync(&self, invoice: &mut Invoice) -> Result<SentPayment> {
        let response = if invoice.keysend {
            let preimage = utils::make_preimage();
            let payment_hash = utils::payment_hash(&preimage);
            invoice.r_hash = hex::encode(payment_hash);

            let destination = hex::decode(&invoice.destination_pubkey)
                .map_err(|err| LedgerError::Decode(err.to_string()))?;
            let mut custom_records = invoice
                .destination_custom_records
                .iter()
                .filter(|record| record.key != KEYSEND_CUSTOM_RECORD)
                .map(|record| hex::decode(&record.value).map(|value| (record.key, value)))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|err| LedgerError::Decode(err.to_string()))?;
            custom_records.push((KEYSEND_CUSTOM_RECORD, preimage.to_vec()));

            self.gateway
                .pay_keysend(KeysendPaymentRequest {
                    destination,
                    amount: invoice.amount,
                    payment_hash: payment_hash.to_vec(),
                    fee_limit: self.fee_limit_sat,
                    dest_features: vec![TLV_ONION_REQ],
                    custom_records,
                })
                .await
        } else {
            self.gateway
                .pay_standard(StandardPaymentRequest {
                    payment_request: invoice.payment_request.clone(),
                    amount: invoice.amount,
                    fee_limit: self.fee_limit_sat,
                })
                .await
        };

        let response = response.map_err(|err| LedgerError::PaymentFailed(err.to_string()))?;

        if !response.payment_error.is_empty() {
            return Err(LedgerError::PaymentFailed(response.payment_error));
        }
        let preimage = match response.payment_preimage {
            Some(preimage) if !preimage.is_empty() => preimage,
            _ => return Err(LedgerError::PaymentFailed("no preimage returned".to_string())),
        };

        Ok(SentPayment {
            preimage,
            payment_hash: response.payment_hash,
            fee: response.route.total_fees,
        })
    }

    /// Counters the principal entry and marks the invoice as failed.
    async fn handle_failed_payment(
        &self,
        invoice: &mut Invoice,
        principal: &TransactionEntry,
        err: &LedgerError,
    ) {
        warn!(
            "Payment failed user_id:{} amount:{}: {}",
            invoice.user_id, invoice.amount, err
        );

        if let Err(reversal_err) = self.ledger.record_entry(principal.reversal()).await {
            error!(
                "Could not reverse failed payment invoice_id:{} amount:{}: {}",
                principal.invoice_id, principal.amount, reversal_err
            );
            self.reporter
                .capture_error("reversing failed payment", &reversal_err);
        }

        invoice.state = InvoiceState::Error;
        invoice.error_message = Some(match err {
            LedgerError::PaymentFailed(message) => message.clone(),
            other => other.to_string(),
        });
        match self.invoices.update(invoice).await {
            Ok(updated) => *invoice = updated,
            Err(update_err) => {
                error!(
                    "Could not update failed payment invoice {}: {}",
                    principal.invoice_id, update_err
                );
                self.reporter
                    .capture_error("marking invoice as failed", &update_err);
            }
        }
    }

    /// Settles the invoice and books the routing fee against the principal.
    /// A negative balance afterwards is reported, the payment stands.
    async fn handle_successful_payment(
        &self,
        invoice: &mut Invoice,
        principal: &TransactionEntry,
    ) {
        invoice.state = InvoiceState::Settled;
        invoice.settled_at = Some(Datetime(Utc::now()));
        match self.invoices.update(invoice).await {
            Ok(updated) => *invoice = updated,
            Err(err) => {
                error!(
                    "Could not update successful payment invoice {}: {}",
                    principal.invoice_id, err
                );
                self.reporter.capture_error("marking invoice as settled", &err);
            }
        }

        if let Err(err) = self.record_fee(invoice, principal).await {
            self.reporter.capture_error("recording routing fee", &err);
        }

        match self.ledger.balance_of(invoice.user_id).await {
            Ok(balance) if balance < 0 => {
                error!(
                    "User {} balance is negative after payment: {}",
                    invoice.user_id, balance
                );
                self.reporter.capture_message(&format!(
                    "User balance is negative user_id:{} balance:{}",
                    invoice.user_id, balance
                ));
            }
            Ok(_) => {}
            Err(err) => self.reporter.capture_error("reading balance", &err),
        }
    }

    async fn record_fee(
        &self,
        invoice: &Invoice,
        principal: &TransactionEntry,
    ) -> Result<TransactionEntry> {
        let parent_key = match principal.key() {
            Some(key) => key,
            None => return Err(LedgerError::NotFound("principal entry without id".to_string())),
        };
        let fees = self
            .accounts
            .account_for(invoice.user_id, AccountKind::Fees)
            .await?;

        self.ledger
            .record_entry(TransactionEntry::fee_for(
                principal,
                parent_key,
                &fees,
                invoice.fee,
            ))
            .await
    }

    fn report_store(&self, context: &str, err: LedgerError) -> LedgerError {
        if err.is_store() {
            self.reporter.capture_error(context, &err);
        }
        err
    }
}
