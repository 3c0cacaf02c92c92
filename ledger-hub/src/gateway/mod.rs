//! Narrow view of the Lightning node used by the ledger.
//!
//! The node itself lives outside this crate; hosts implement
//! [`NetworkGateway`] over their node client.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::entity::CustomRecord;

pub mod bolt11;
#[cfg(test)]
pub mod mock;

/// TLV type carrying the preimage of a keysend payment.
pub const KEYSEND_CUSTOM_RECORD: u64 = 5482373484;

/// `TLV_ONION_REQ` feature bit required by keysend destinations.
pub const TLV_ONION_REQ: i32 = 8;

/// Fields of a payment request the ledger cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedInvoice {
    pub amount: i64,
    pub destination_pubkey: String,
    pub description_hash: String,
    pub memo: String,
    /// Creation time, unix seconds.
    pub timestamp: i64,
    pub expiry_secs: i64,
    pub payment_hash: String,
    pub keysend: bool,
    pub custom_records: Vec<CustomRecord>,
}

impl DecodedInvoice {
    /// Details of a spontaneous payment, there is no request to decode.
    pub fn keysend(
        destination_pubkey: String,
        amount: i64,
        memo: String,
        custom_records: Vec<CustomRecord>,
        expiry_secs: i64,
    ) -> Self {
        Self {
            amount,
            destination_pubkey,
            memo,
            timestamp: Utc::now().timestamp(),
            expiry_secs,
            keysend: true,
            custom_records,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardPaymentRequest {
    pub payment_request: String,
    pub amount: i64,
    pub fee_limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysendPaymentRequest {
    pub destination: Vec<u8>,
    pub amount: i64,
    pub payment_hash: Vec<u8>,
    pub fee_limit: i64,
    pub dest_features: Vec<i32>,
    pub custom_records: Vec<(u64, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInvoiceRequest {
    pub memo: String,
    pub description_hash: Vec<u8>,
    pub amount: i64,
    pub preimage: Vec<u8>,
    pub expiry_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInvoice {
    pub payment_request: String,
    pub payment_hash: Vec<u8>,
    pub add_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Route {
    pub total_amt: i64,
    pub total_fees: i64,
}

/// Raw answer of a payment call. Failure is signalled in band through
/// `payment_error` or a missing preimage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GatewayPayment {
    pub payment_error: String,
    pub payment_preimage: Option<Vec<u8>>,
    pub payment_hash: Vec<u8>,
    pub route: Route,
}

#[async_trait]
pub trait NetworkGateway: Send + Sync {
    /// Hex encoded identity key of our own node.
    async fn identity_pubkey(&self) -> Result<String>;

    async fn decode_invoice(&self, bolt11: &str) -> Result<DecodedInvoice>;

    async fn pay_standard(&self, request: StandardPaymentRequest) -> Result<GatewayPayment>;

    async fn pay_keysend(&self, request: KeysendPaymentRequest) -> Result<GatewayPayment>;

    async fn create_invoice(&self, request: CreateInvoiceRequest) -> Result<CreatedInvoice>;
}
