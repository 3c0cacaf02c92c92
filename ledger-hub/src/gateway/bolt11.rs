use std::str::FromStr;

use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription};

use crate::error::{LedgerError, Result};

use super::DecodedInvoice;

/// Decodes a bolt11 payment request. Amounts are rounded down to satoshis.
pub fn decode_bolt11(bolt11: &str) -> Result<DecodedInvoice> {
    let invoice = Bolt11Invoice::from_str(bolt11.trim())
        .map_err(|err| LedgerError::Decode(err.to_string()))?;

    let (memo, description_hash) = match invoice.description() {
        Bolt11InvoiceDescription::Direct(description) => {
            (description.clone().into_inner().0, String::new())
        }
        Bolt11InvoiceDescription::Hash(hash) => (String::new(), hash.0.to_string()),
    };

    let amount = invoice.amount_milli_satoshis().unwrap_or_default() / 1000;

    Ok(DecodedInvoice {
        amount: i64::try_from(amount).map_err(|err| LedgerError::Decode(err.to_string()))?,
        destination_pubkey: invoice.recover_payee_pub_key().to_string(),
        description_hash,
        memo,
        timestamp: invoice.duration_since_epoch().as_secs() as i64,
        expiry_secs: invoice.expiry_time().as_secs() as i64,
        payment_hash: invoice.payment_hash().to_string(),
        keysend: false,
        custom_records: Vec::new(),
    })
}
