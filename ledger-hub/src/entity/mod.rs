use std::fmt;

use chrono::{DateTime, Utc};
use database::surrealdb::sql::{Datetime, Thing};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Spendable balance.
    Current,
    /// Counterpart of funds received from the network.
    Incoming,
    /// Counterpart of funds sent to the network.
    Outgoing,
    Fees,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Fees => "fees",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(skip_serializing)]
    pub id: Option<Thing>,
    pub user_id: i64,
    pub kind: AccountKind,
    /// Bumped by every debit, see the ledger's guarded insert.
    #[serde(default)]
    pub guard_seq: i64,
}

impl Account {
    pub fn new(user_id: i64, kind: AccountKind) -> Self {
        Self {
            id: None,
            user_id,
            kind,
            guard_seq: 0,
        }
    }

    /// Record key of the account, one per `(user, kind)`.
    pub fn key_for(user_id: i64, kind: AccountKind) -> String {
        format!("{}_{}", user_id, kind.as_str())
    }

    pub fn key(&self) -> String {
        Self::key_for(self.user_id, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceType {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    Initialized,
    Open,
    Settled,
    Error,
    /// Never stored, derived by readers from `expires_at`.
    Expired,
}

impl InvoiceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Error)
    }
}

impl fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Initialized => "initialized",
            Self::Open => "open",
            Self::Settled => "settled",
            Self::Error => "error",
            Self::Expired => "expired",
        };
        f.write_str(state)
    }
}

/// Keysend TLV record, value hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRecord {
    pub key: u64,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(skip_serializing)]
    pub id: Option<Thing>,
    pub invoice_type: InvoiceType,
    pub user_id: i64,
    pub payment_request: String,
    pub r_hash: String,
    pub preimage: String,
    pub amount: i64,
    pub fee: i64,
    pub memo: String,
    pub description_hash: String,
    pub destination_pubkey: String,
    pub keysend: bool,
    #[serde(default)]
    pub destination_custom_records: Vec<CustomRecord>,
    pub add_index: u64,
    pub state: InvoiceState,
    pub internal: bool,
    pub expires_at: Option<Datetime>,
    pub settled_at: Option<Datetime>,
    pub error_message: Option<String>,
    pub created_at: Datetime,
}

impl Invoice {
    pub fn new(invoice_type: InvoiceType, user_id: i64) -> Self {
        Self {
            id: None,
            invoice_type,
            user_id,
            payment_request: String::new(),
            r_hash: String::new(),
            preimage: String::new(),
            amount: 0,
            fee: 0,
            memo: String::new(),
            description_hash: String::new(),
            destination_pubkey: String::new(),
            keysend: false,
            destination_custom_records: Vec::new(),
            add_index: 0,
            state: InvoiceState::Initialized,
            internal: false,
            expires_at: None,
            settled_at: None,
            error_message: None,
            created_at: Datetime(Utc::now()),
        }
    }

    pub fn key(&self) -> Option<String> {
        self.id.as_ref().map(|id| id.id.to_raw())
    }

    /// State as seen by readers: an open invoice past its expiry is expired.
    pub fn effective_state(&self, now: DateTime<Utc>) -> InvoiceState {
        match (&self.state, &self.expires_at) {
            (InvoiceState::Open, Some(expires_at)) if expires_at.0 <= now => InvoiceState::Expired,
            (state, _) => *state,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.state == InvoiceState::Settled
    }
}

/// One immutable double-entry record. Corrections are new entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntry {
    #[serde(skip_serializing)]
    pub id: Option<Thing>,
    pub user_id: i64,
    pub invoice_id: String,
    pub credit_account_id: String,
    pub debit_account_id: String,
    pub amount: i64,
    pub parent_id: Option<String>,
    pub created_at: Datetime,
}

impl TransactionEntry {
    pub fn new(
        user_id: i64,
        invoice_id: String,
        credit: &Account,
        debit: &Account,
        amount: i64,
    ) -> Self {
        Self {
            id: None,
            user_id,
            invoice_id,
            credit_account_id: credit.key(),
            debit_account_id: debit.key(),
            amount,
            parent_id: None,
            created_at: Datetime(Utc::now()),
        }
    }

    pub fn with_parent(mut self, parent_id: String) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Fee riding on `parent`: debits the account the principal debited.
    pub fn fee_for(parent: &Self, parent_id: String, fees: &Account, amount: i64) -> Self {
        Self {
            id: None,
            user_id: parent.user_id,
            invoice_id: parent.invoice_id.clone(),
            credit_account_id: fees.key(),
            debit_account_id: parent.debit_account_id.clone(),
            amount,
            parent_id: Some(parent_id),
            created_at: Datetime(Utc::now()),
        }
    }

    /// Counter entry with credit and debit swapped.
    pub fn reversal(&self) -> Self {
        Self {
            id: None,
            user_id: self.user_id,
            invoice_id: self.invoice_id.clone(),
            credit_account_id: self.debit_account_id.clone(),
            debit_account_id: self.credit_account_id.clone(),
            amount: self.amount,
            parent_id: None,
            created_at: Datetime(Utc::now()),
        }
    }

    pub fn key(&self) -> Option<String> {
        self.id.as_ref().map(|id| id.id.to_raw())
    }
}
