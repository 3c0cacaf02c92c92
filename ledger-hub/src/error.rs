use std::fmt;

use database::surrealdb;

use crate::entity::InvoiceState;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Invoice or account lookup miss.
    NotFound(String),
    /// The balance guard refused a debit from a current account.
    InsufficientBalance,
    InvalidAmount(i64),
    InvalidState(InvoiceState),
    /// The node reported a failed payment, in band or as a transport error.
    PaymentFailed(String),
    Decode(String),
    /// The node could not be reached for a non-payment call.
    Node(String),
    Store(String),
}

impl LedgerError {
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl std::error::Error for LedgerError {}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "{} not found", what),
            Self::InsufficientBalance => write!(f, "not enough balance"),
            Self::InvalidAmount(amount) => write!(f, "invalid amount {}", amount),
            Self::InvalidState(state) => write!(f, "invoice is {}", state),
            Self::PaymentFailed(msg) => write!(f, "payment failed: {}", msg),
            Self::Decode(msg) => write!(f, "cannot decode payment request: {}", msg),
            Self::Node(msg) => write!(f, "lightning node error: {}", msg),
            Self::Store(msg) => write!(f, "store error: {}", msg),
        }
    }
}

impl From<surrealdb::Error> for LedgerError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Store(err.to_string())
    }
}
