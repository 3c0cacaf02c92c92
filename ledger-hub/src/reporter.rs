use log::{error, warn};

use crate::error::LedgerError;

/// Sink for events that need a human to look at them: store faults and
/// ledger anomalies. They never change the outcome of an operation.
pub trait IncidentReporter: Send + Sync {
    fn capture_error(&self, context: &str, err: &LedgerError);

    fn capture_message(&self, message: &str);
}

/// Reports through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl IncidentReporter for LogReporter {
    fn capture_error(&self, context: &str, err: &LedgerError) {
        error!("{}: {}", context, err);
    }

    fn capture_message(&self, message: &str) {
        warn!("{}", message);
    }
}
