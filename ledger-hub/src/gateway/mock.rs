//! Scriptable in-memory gateway for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::utils::{make_preimage, payment_hash};

use super::{
    CreateInvoiceRequest, CreatedInvoice, DecodedInvoice, GatewayPayment, KeysendPaymentRequest,
    NetworkGateway, Route, StandardPaymentRequest, KEYSEND_CUSTOM_RECORD,
};

pub const NODE_PUBKEY: &str = "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const REMOTE_PUBKEY: &str = "03bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

#[derive(Debug, Clone)]
pub enum PayOutcome {
    Succeed { fee: i64 },
    /// Succeeds only after the given delay.
    SucceedAfter { delay: Duration, fee: i64 },
    /// The call returns, but carries an error string.
    InBandError(String),
    MissingPreimage,
    Transport(String),
}

pub struct MockGateway {
    outcome: Mutex<PayOutcome>,
    invoices: Mutex<HashMap<String, DecodedInvoice>>,
    preimages: Mutex<HashMap<String, Vec<u8>>>,
    add_index: AtomicU64,
    create_fails: AtomicBool,
    pub standard_calls: Mutex<Vec<StandardPaymentRequest>>,
    pub keysend_calls: Mutex<Vec<KeysendPaymentRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(PayOutcome::Succeed { fee: 0 }),
            invoices: Mutex::new(HashMap::new()),
            preimages: Mutex::new(HashMap::new()),
            add_index: AtomicU64::new(0),
            create_fails: AtomicBool::new(false),
            standard_calls: Mutex::new(Vec::new()),
            keysend_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_outcome(&self, outcome: PayOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn fail_invoice_creation(&self, fail: bool) {
        self.create_fails.store(fail, Ordering::SeqCst);
    }

    /// Registers an invoice issued by some other node and returns its bolt11.
    pub fn external_invoice(&self, amount: i64) -> String {
        let preimage = make_preimage();
        let hash = hex::encode(payment_hash(&preimage));
        let bolt11 = format!("lnbcrt{}n1ext{}", amount, hash);

        self.register(
            bolt11.clone(),
            DecodedInvoice {
                amount,
                destination_pubkey: REMOTE_PUBKEY.to_string(),
                memo: "external".to_string(),
                timestamp: Utc::now().timestamp(),
                expiry_secs: 3600,
                payment_hash: hash,
                ..Default::default()
            },
            preimage.to_vec(),
        );
        bolt11
    }

    pub fn pay_calls(&self) -> usize {
        self.standard_calls.lock().unwrap().len() + self.keysend_calls.lock().unwrap().len()
    }

    fn register(&self, bolt11: String, decoded: DecodedInvoice, preimage: Vec<u8>) {
        self.preimages
            .lock()
            .unwrap()
            .insert(decoded.payment_hash.clone(), preimage);
        self.invoices.lock().unwrap().insert(bolt11, decoded);
    }

    async fn settle(&self, amount: i64, preimage: Option<Vec<u8>>) -> Result<GatewayPayment> {
        let outcome = self.outcome.lock().unwrap().clone();
        let preimage = preimage.unwrap_or_else(|| make_preimage().to_vec());
        let hash = payment_hash(&preimage).to_vec();

        let fee = match outcome {
            PayOutcome::Succeed { fee } => fee,
            PayOutcome::SucceedAfter { delay, fee } => {
                tokio::time::sleep(delay).await;
                fee
            }
            PayOutcome::InBandError(error) => {
                return Ok(GatewayPayment {
                    payment_error: error,
                    ..Default::default()
                })
            }
            PayOutcome::MissingPreimage => {
                return Ok(GatewayPayment {
                    payment_hash: hash,
                    ..Default::default()
                })
            }
            PayOutcome::Transport(error) => bail!(error),
        };

        Ok(GatewayPayment {
            payment_error: String::new(),
            payment_preimage: Some(preimage),
            payment_hash: hash,
            route: Route {
                total_amt: amount + fee,
                total_fees: fee,
            },
        })
    }
}

#[async_trait]
impl NetworkGateway for MockGateway {
    async fn identity_pubkey(&self) -> Result<String> {
        Ok(NODE_PUBKEY.to_string())
    }

    async fn decode_invoice(&self, bolt11: &str) -> Result<DecodedInvoice> {
        self.invoices
            .lock()
            .unwrap()
            .get(bolt11)
            .cloned()
            .ok_or_else(|| anyhow!("invalid payment request"))
    }

    async fn pay_standard(&self, request: StandardPaymentRequest) -> Result<GatewayPayment> {
        self.standard_calls.lock().unwrap().push(request.clone());

        let preimage = {
            let invoices = self.invoices.lock().unwrap();
            let preimages = self.preimages.lock().unwrap();
            invoices
                .get(&request.payment_request)
                .and_then(|decoded| preimages.get(&decoded.payment_hash))
                .cloned()
        };
        self.settle(request.amount, preimage).await
    }

    async fn pay_keysend(&self, request: KeysendPaymentRequest) -> Result<GatewayPayment> {
        self.keysend_calls.lock().unwrap().push(request.clone());

        let preimage = request
            .custom_records
            .iter()
            .find(|(key, _)| *key == KEYSEND_CUSTOM_RECORD)
            .map(|(_, value)| value.clone());
        self.settle(request.amount, preimage).await
    }

    async fn create_invoice(&self, request: CreateInvoiceRequest) -> Result<CreatedInvoice> {
        if self.create_fails.load(Ordering::SeqCst) {
            bail!("node unavailable");
        }

        let hash = payment_hash(&request.preimage);
        let bolt11 = format!("lnbcrt{}n1int{}", request.amount, hex::encode(hash));
        self.register(
            bolt11.clone(),
            DecodedInvoice {
                amount: request.amount,
                destination_pubkey: NODE_PUBKEY.to_string(),
                description_hash: hex::encode(&request.description_hash),
                memo: request.memo,
                timestamp: Utc::now().timestamp(),
                expiry_secs: request.expiry_secs,
                payment_hash: hex::encode(hash),
                ..Default::default()
            },
            request.preimage,
        );

        Ok(CreatedInvoice {
            payment_request: bolt11,
            payment_hash: hash.to_vec(),
            add_index: self.add_index.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }
}
