use chrono::Utc;
use database::surrealdb::{sql::Datetime, Connection, Surreal};
use uuid::Uuid;

use crate::{
    entity::{Invoice, InvoiceState, InvoiceType},
    error::{LedgerError, Result},
};

pub struct InvoiceRepository<C>
where
    C: Connection,
{
    db: Surreal<C>,
}

impl<C> InvoiceRepository<C>
where
    C: Connection,
{
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    pub async fn create(&self, invoice: Invoice) -> Result<Invoice> {
        let key = Uuid::new_v4().simple().to_string();

        let created: Option<Invoice> = self
            .db
            .create(("invoice", key.clone()))
            .content(invoice)
            .await?;

        match created {
            Some(invoice) => Ok(invoice),
            None => Err(LedgerError::Store(format!("cannot store invoice {}", key))),
        }
    }

    /// Replaces the whole row of an already stored invoice.
    pub async fn update(&self, invoice: &Invoice) -> Result<Invoice> {
        let key = match invoice.key() {
            Some(key) => key,
            None => return Err(LedgerError::NotFound("invoice without id".to_string())),
        };

        let updated: Option<Invoice> = self
            .db
            .update(("invoice", key.clone()))
            .content(invoice.clone())
            .await?;

        match updated {
            Some(invoice) => Ok(invoice),
            None => Err(LedgerError::NotFound(format!("invoice {}", key))),
        }
    }

    /// Puts a claimed incoming invoice back to open after its credit failed.
    pub async fn reopen(&self, invoice: &Invoice) -> Result<Invoice> {
        let mut invoice = invoice.clone();
        invoice.state = InvoiceState::Open;
        invoice.internal = false;
        invoice.settled_at = None;
        self.update(&invoice).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Invoice>> {
        let invoice: Option<Invoice> = self.db.select(("invoice", key.to_string())).await?;
        Ok(invoice)
    }

    pub async fn find_by_payment_hash(&self, user_id: i64, r_hash: &str) -> Result<Invoice> {
        let mut res = self
            .db
            .query("SELECT * FROM invoice WHERE user_id = $user AND r_hash = $r_hash LIMIT 1")
            .bind(("user", user_id))
            .bind(("r_hash", r_hash.to_string()))
            .await?;

        let invoice: Option<Invoice> = res.take(0)?;
        match invoice {
            Some(invoice) => Ok(invoice),
            None => Err(LedgerError::NotFound(format!("invoice {}", r_hash))),
        }
    }

    pub async fn find_by_user(
        &self,
        user_id: i64,
        invoice_type: InvoiceType,
    ) -> Result<Vec<Invoice>> {
        let mut res = self
            .db
            .query("SELECT * FROM invoice WHERE user_id = $user AND invoice_type = $invoice_type ORDER BY created_at DESC")
            .bind(("user", user_id))
            .bind(("invoice_type", invoice_type))
            .await?;

        Ok(res.take(0)?)
    }

    /// Claims an initialized outgoing invoice for payment by moving it to
    /// open. `None` when the row is missing or already claimed.
    pub async fn begin_outgoing_payment(&self, key: &str) -> Result<Option<Invoice>> {
        self.transition(key, InvoiceState::Initialized, InvoiceState::Open)
            .await
    }

    /// Hands a claimed outgoing invoice back when its payment never started.
    pub async fn release_outgoing_payment(&self, key: &str) -> Result<Option<Invoice>> {
        self.transition(key, InvoiceState::Open, InvoiceState::Initialized)
            .await
    }

    async fn transition(
        &self,
        key: &str,
        from: InvoiceState,
        to: InvoiceState,
    ) -> Result<Option<Invoice>> {
        let mut res = self
            .db
            .query(
                "UPDATE type::thing('invoice', $key) SET state = $to \
                 WHERE invoice_type = $outgoing AND state = $from RETURN AFTER",
            )
            .bind(("key", key.to_string()))
            .bind(("to", to))
            .bind(("outgoing", InvoiceType::Outgoing))
            .bind(("from", from))
            .await?;

        let moved: Vec<Invoice> = res.take(0)?;
        Ok(moved.into_iter().next())
    }

    /// Atomically moves the open incoming invoice carrying `payment_request`
    /// to settled, for whichever user owns it. At most one caller wins.
    pub async fn settle_open_incoming_by_request(
        &self,
        payment_request: &str,
        internal: bool,
    ) -> Result<Option<Invoice>> {
        self.settle_open_incoming("payment_request", payment_request, internal)
            .await
    }

    /// Same as [`Self::settle_open_incoming_by_request`], keyed by payment hash.
    pub async fn settle_open_incoming_by_hash(&self, r_hash: &str) -> Result<Option<Invoice>> {
        self.settle_open_incoming("r_hash", r_hash, false).await
    }

    async fn settle_open_incoming(
        &self,
        field: &str,
        value: &str,
        internal: bool,
    ) -> Result<Option<Invoice>> {
        let mut res = self
            .db
            .query(format!(
                "UPDATE invoice SET state = $settled, internal = $internal, settled_at = $now \
                 WHERE invoice_type = $incoming AND {} = $value AND state = $open RETURN AFTER",
                field
            ))
            .bind(("settled", InvoiceState::Settled))
            .bind(("internal", internal))
            .bind(("now", Datetime(Utc::now())))
            .bind(("incoming", InvoiceType::Incoming))
            .bind(("value", value.to_string()))
            .bind(("open", InvoiceState::Open))
            .await?;

        let settled: Vec<Invoice> = res.take(0)?;
        Ok(settled.into_iter().next())
    }
}
