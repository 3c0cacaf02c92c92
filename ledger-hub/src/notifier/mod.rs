//! Live delivery of settled incoming invoices to connected clients.
//!
//! Each user has at most one mailbox. Subscribing again replaces the previous
//! mailbox, whose receiver then drains and ends. Publishing never waits: a
//! full or missing mailbox drops the event, the invoice row already carries
//! the settlement.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::entity::Invoice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    NoSubscriber,
    MailboxFull,
    Disconnected,
}

struct Mailbox {
    id: u64,
    sender: mpsc::Sender<Invoice>,
}

struct RegistryInner {
    mailboxes: Mutex<HashMap<i64, Mailbox>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl RegistryInner {
    fn mailboxes(&self) -> MutexGuard<'_, HashMap<i64, Mailbox>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unregister(&self, user_id: i64, id: u64) {
        let mut mailboxes = self.mailboxes();
        if mailboxes.get(&user_id).map(|m| m.id) == Some(id) {
            mailboxes.remove(&user_id);
            debug!("Unsubscribed invoice stream of user {}", user_id);
        }
    }
}

/// Shared handle, cheap to clone into the transport and the settlement path.
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                mailboxes: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self, user_id: i64) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.capacity);

        let replaced = self
            .inner
            .mailboxes()
            .insert(user_id, Mailbox { id, sender });
        if replaced.is_some() {
            debug!("Replaced invoice stream of user {}", user_id);
        }

        Subscription {
            user_id,
            id,
            receiver,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn publish(&self, invoice: &Invoice) -> Delivery {
        let user_id = invoice.user_id;
        let mut mailboxes = self.inner.mailboxes();

        let (id, result) = match mailboxes.get(&user_id) {
            Some(mailbox) => (mailbox.id, mailbox.sender.try_send(invoice.clone())),
            None => return Delivery::NoSubscriber,
        };

        match result {
            Ok(_) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Invoice stream of user {} is full, dropping {}",
                    user_id, invoice.r_hash
                );
                Delivery::MailboxFull
            }
            Err(TrySendError::Closed(_)) => {
                if mailboxes.get(&user_id).map(|m| m.id) == Some(id) {
                    mailboxes.remove(&user_id);
                }
                Delivery::Disconnected
            }
        }
    }

    pub fn is_subscribed(&self, user_id: i64) -> bool {
        self.inner.mailboxes().contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.inner.mailboxes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving end of one user's mailbox. Dropping it unregisters the mailbox
/// unless a newer subscription already replaced it.
pub struct Subscription {
    user_id: i64,
    id: u64,
    receiver: mpsc::Receiver<Invoice>,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Next settled invoice, `None` once the mailbox was replaced.
    pub async fn recv(&mut self) -> Option<Invoice> {
        self.receiver.recv().await
    }

    /// Like [`Self::recv`], but gives up as soon as `cancelled` completes.
    pub async fn recv_until<F>(&mut self, cancelled: F) -> Option<Invoice>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = cancelled => None,
            invoice = self.receiver.recv() => invoice,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.user_id, self.id);
        }
    }
}
