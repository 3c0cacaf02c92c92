use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use database::surrealdb::{sql::Datetime, Connection, Surreal};
use log::{info, warn};

use crate::{
    entity::{CustomRecord, Invoice, InvoiceState, InvoiceType},
    error::{LedgerError, Result},
    gateway::{CreateInvoiceRequest, DecodedInvoice, NetworkGateway},
    reporter::IncidentReporter,
    repository::invoice_repository::InvoiceRepository,
    utils,
};

/// Creation and lookup of invoices, before any money moves.
pub struct InvoiceService<C>
where
    C: Connection,
{
    repository: InvoiceRepository<C>,
    gateway: Arc<dyn NetworkGateway>,
    reporter: Arc<dyn IncidentReporter>,
    identity_pubkey: String,
    incoming_expiry_secs: i64,
    keysend_expiry_secs: i64,
}

impl<C> InvoiceService<C>
where
    C: Connection,
{
    pub fn new(
        db: Surreal<C>,
        gateway: Arc<dyn NetworkGateway>,
        reporter: Arc<dyn IncidentReporter>,
        identity_pubkey: String,
        incoming_expiry_secs: i64,
        keysend_expiry_secs: i64,
    ) -> Self {
        Self {
            repository: InvoiceRepository::new(db),
            gateway,
            reporter,
            identity_pubkey,
            incoming_expiry_secs,
            keysend_expiry_secs,
        }
    }

    pub async fn decode_payment_request(&self, bolt11: &str) -> Result<DecodedInvoice> {
        self.gateway
            .decode_invoice(bolt11)
            .await
            .map_err(|err| LedgerError::Decode(err.to_string()))
    }

    /// Details for a keysend payment to `destination_pubkey`.
    pub fn keysend_details(
        &self,
        destination_pubkey: String,
        amount: i64,
        memo: String,
        custom_records: Vec<CustomRecord>,
    ) -> DecodedInvoice {
        DecodedInvoice::keysend(
            destination_pubkey,
            amount,
            memo,
            custom_records,
            self.keysend_expiry_secs,
        )
    }

    /// Stores the outgoing invoice before anything is sent, so a failure
    /// further down always has a row to land on.
    pub async fn add_outgoing_invoice(
        &self,
        user_id: i64,
        payment_request: &str,
        decoded: &DecodedInvoice,
    ) -> Result<Invoice> {
        let mut invoice = Invoice::new(InvoiceType::Outgoing, user_id);
        invoice.payment_request = payment_request.to_string();
        invoice.r_hash = decoded.payment_hash.clone();
        invoice.amount = decoded.amount;
        invoice.destination_pubkey = decoded.destination_pubkey.clone();
        invoice.description_hash = decoded.description_hash.clone();
        invoice.memo = decoded.memo.clone();
        invoice.keysend = decoded.keysend;
        invoice.destination_custom_records = decoded.custom_records.clone();
        invoice.expires_at = Utc
            .timestamp_opt(decoded.timestamp + decoded.expiry_secs, 0)
            .single()
            .map(Datetime);

        self.repository
            .create(invoice)
            .await
            .map_err(|err| self.report_store("storing outgoing invoice", err))
    }

    /// Stores the incoming invoice, then registers it with the node. A node
    /// failure leaves the row initialized.
    pub async fn add_incoming_invoice(
        &self,
        user_id: i64,
        amount: i64,
        memo: &str,
        description_hash: &str,
    ) -> Result<Invoice> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let description_hash_bytes =
            hex::decode(description_hash).map_err(|err| LedgerError::Decode(err.to_string()))?;

        let preimage = utils::make_preimage();
        let expiry = self.incoming_expiry_secs;

        let mut invoice = Invoice::new(InvoiceType::Incoming, user_id);
        invoice.amount = amount;
        invoice.memo = memo.to_string();
        invoice.description_hash = description_hash.to_string();
        invoice.expires_at = Some(Datetime(Utc::now() + Duration::seconds(expiry)));
        let mut invoice = self
            .repository
            .create(invoice)
            .await
            .map_err(|err| self.report_store("storing incoming invoice", err))?;

        let created = match self
            .gateway
            .create_invoice(CreateInvoiceRequest {
                memo: memo.to_string(),
                description_hash: description_hash_bytes,
                amount,
                preimage: preimage.to_vec(),
                expiry_secs: expiry,
            })
            .await
        {
            Ok(created) => created,
            Err(err) => {
                warn!(
                    "Node refused invoice user_id:{} amount:{}: {}",
                    user_id, amount, err
                );
                return Err(LedgerError::Node(err.to_string()));
            }
        };

        invoice.payment_request = created.payment_request;
        invoice.r_hash = hex::encode(&created.payment_hash);
        invoice.preimage = hex::encode(preimage);
        invoice.add_index = created.add_index;
        invoice.destination_pubkey = self.identity_pubkey.clone();
        invoice.state = InvoiceState::Open;

        let invoice = self
            .repository
            .update(&invoice)
            .await
            .map_err(|err| self.report_store("opening incoming invoice", err))?;
        info!(
            "Added incoming invoice user_id:{} amount:{} r_hash:{}",
            user_id, amount, invoice.r_hash
        );

        Ok(invoice)
    }

    pub async fn find_invoice_by_payment_hash(
        &self,
        user_id: i64,
        r_hash: &str,
    ) -> Result<Invoice> {
        self.repository
            .find_by_payment_hash(user_id, r_hash)
            .await
            .map_err(|err| self.report_store("finding invoice", err))
    }

    /// Invoices of one direction, newest first.
    pub async fn list_invoices(
        &self,
        user_id: i64,
        invoice_type: InvoiceType,
    ) -> Result<Vec<Invoice>> {
        self.repository
            .find_by_user(user_id, invoice_type)
            .await
            .map_err(|err| self.report_store("listing invoices", err))
    }

    fn report_store(&self, context: &str, err: LedgerError) -> LedgerError {
        if err.is_store() {
            self.reporter.capture_error(context, &err);
        }
        err
    }
}
