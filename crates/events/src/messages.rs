use serde::{Deserialize, Serialize};

/// Messages the node publishes on the events exchange.
///
/// Every queue bound to the exchange receives all variants. The settlement
/// watcher only acts on `InvoiceUpdated`, outgoing payments are reconciled
/// by the paying call itself, so the payment variants are acked unread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightningNodeEvent {
    /// An invoice issued by the node changed state.
    InvoiceUpdated {
        /// Hex encoded payment hash of the invoice.
        payment_hash: String,
        /// Whether the invoice is now settled.
        settled: bool,
        /// Amount actually received, in satoshis.
        #[serde(default)]
        amount_paid_sat: i64,
    },
    /// A sent payment was successful.
    PaymentSuccessful {
        /// The hash of the payment.
        payment_hash: String,
    },
    /// A sent payment has failed.
    PaymentFailed {
        /// The hash of the payment.
        payment_hash: String,
    },
}
