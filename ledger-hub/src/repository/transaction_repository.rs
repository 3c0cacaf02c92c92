use database::surrealdb::{Connection, Surreal};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    entity::{Account, AccountKind, TransactionEntry},
    error::{LedgerError, Result},
};

/// Inserts the entry only when the debit account stays covered.
///
/// Every debit first bumps `guard_seq` on the debit account row. Two
/// transactions debiting one account therefore write the same key, and an
/// optimistic store aborts one of them instead of letting both pass the
/// balance read.
const GUARDED_INSERT: &str = "
    BEGIN TRANSACTION;
    UPDATE type::thing('account', $debit) SET guard_seq += 1;
    LET $balance = math::sum((SELECT VALUE amount FROM transaction_entry WHERE credit_account_id = $debit))
        - math::sum((SELECT VALUE amount FROM transaction_entry WHERE debit_account_id = $debit));
    IF $unguarded OR ($balance >= $amount) THEN
        (CREATE type::thing('transaction_entry', $key) CONTENT $entry)
    END;
    COMMIT TRANSACTION;
";

/// Attempts at the guarded insert before a conflict is surfaced as a store
/// error.
const GUARD_ATTEMPTS: usize = 3;

/// Double-entry ledger. Entries are only ever inserted.
pub struct TransactionRepository<C>
where
    C: Connection,
{
    db: Surreal<C>,
}

impl<C> TransactionRepository<C>
where
    C: Connection,
{
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Records one entry. Principal debits of a current account are refused
    /// with `InsufficientBalance` when the account cannot cover them.
    pub async fn record_entry(&self, entry: TransactionEntry) -> Result<TransactionEntry> {
        let allowed_zero = entry.parent_id.is_some() && entry.amount == 0;
        if entry.amount <= 0 && !allowed_zero {
            return Err(LedgerError::InvalidAmount(entry.amount));
        }

        let debit: Option<Account> = self
            .db
            .select(("account", entry.debit_account_id.clone()))
            .await?;
        let debit = match debit {
            Some(account) => account,
            None => return Err(LedgerError::NotFound(format!(
                "account {}",
                entry.debit_account_id
            ))),
        };
        let guarded = debit.kind == AccountKind::Current && entry.parent_id.is_none();

        let key = Uuid::new_v4().simple().to_string();
        let mut attempt = 1;
        while let Err(err) = self.guarded_insert(&entry, &key, guarded).await {
            if attempt >= GUARD_ATTEMPTS {
                return Err(err);
            }
            info!(
                "Guarded insert on {} failed, retrying: {}",
                entry.debit_account_id, err
            );
            attempt += 1;
        }

        let created: Option<TransactionEntry> =
            self.db.select(("transaction_entry", key)).await?;

        match created {
            Some(created) => {
                debug!(
                    "Recorded entry user_id:{} invoice_id:{} amount:{}",
                    created.user_id, created.invoice_id, created.amount
                );
                Ok(created)
            }
            None => {
                warn!(
                    "Balance guard refused debit of {} from {}",
                    entry.amount, entry.debit_account_id
                );
                Err(LedgerError::InsufficientBalance)
            }
        }
    }

    async fn guarded_insert(
        &self,
        entry: &TransactionEntry,
        key: &str,
        guarded: bool,
    ) -> Result<()> {
        let mut res = self
            .db
            .query(GUARDED_INSERT)
            .bind(("debit", entry.debit_account_id.clone()))
            .bind(("unguarded", !guarded))
            .bind(("amount", entry.amount))
            .bind(("key", key.to_string()))
            .bind(("entry", entry.clone()))
            .await?;

        let errors = res.take_errors();
        if errors.is_empty() {
            return Ok(());
        }

        let message = errors
            .into_values()
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(LedgerError::Store(message))
    }

    /// Spendable balance of the user's current account.
    pub async fn balance_of(&self, user_id: i64) -> Result<i64> {
        self.account_balance(&Account::key_for(user_id, AccountKind::Current))
            .await
    }

    /// Credits minus debits of one account, computed from the entries.
    pub async fn account_balance(&self, account_key: &str) -> Result<i64> {
        let mut res = self
            .db
            .query("SELECT VALUE amount FROM transaction_entry WHERE credit_account_id = $account")
            .query("SELECT VALUE amount FROM transaction_entry WHERE debit_account_id = $account")
            .bind(("account", account_key.to_string()))
            .await?;

        let credits: Vec<i64> = res.take(0)?;
        let debits: Vec<i64> = res.take(1)?;

        Ok(credits.iter().sum::<i64>() - debits.iter().sum::<i64>())
    }

    pub async fn entries_for_invoice(&self, invoice_id: &str) -> Result<Vec<TransactionEntry>> {
        let mut res = self
            .db
            .query("SELECT * FROM transaction_entry WHERE invoice_id = $invoice ORDER BY created_at ASC")
            .bind(("invoice", invoice_id.to_string()))
            .await?;

        Ok(res.take(0)?)
    }

    pub async fn entries_for_user(&self, user_id: i64) -> Result<Vec<TransactionEntry>> {
        let mut res = self
            .db
            .query("SELECT * FROM transaction_entry WHERE user_id = $user ORDER BY created_at DESC")
            .bind(("user", user_id))
            .await?;

        Ok(res.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::{Account, AccountKind, TransactionEntry};
    use crate::error::LedgerError;
    use crate::repository::account_repository::AccountRepository;
    use crate::testing::test_db;

    use super::TransactionRepository;

    async fn accounts(
        repository: &AccountRepository<database::surrealdb::engine::local::Db>,
        user_id: i64,
    ) -> (Account, Account, Account) {
        (
            repository
                .account_for(user_id, AccountKind::Current)
                .await
                .unwrap(),
            repository
                .account_for(user_id, AccountKind::Incoming)
                .await
                .unwrap(),
            repository
                .account_for(user_id, AccountKind::Outgoing)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_balance_follows_entries() {
        let db = test_db().await;
        let account_repository = AccountRepository::new(db.clone());
        let ledger = TransactionRepository::new(db);
        let (current, incoming, outgoing) = accounts(&account_repository, 1).await;

        assert_eq!(ledger.balance_of(1).await.unwrap(), 0);

        ledger
            .record_entry(TransactionEntry::new(1, "a".into(), &current, &incoming, 1000))
            .await
            .unwrap();
        ledger
            .record_entry(TransactionEntry::new(1, "b".into(), &outgoing, &current, 300))
            .await
            .unwrap();

        assert_eq!(ledger.balance_of(1).await.unwrap(), 700);
        assert_eq!(
            ledger.account_balance(&incoming.key()).await.unwrap(),
            -1000
        );
    }

    #[tokio::test]
    async fn test_guard_rejects_overdraft() {
        let db = test_db().await;
        let account_repository = AccountRepository::new(db.clone());
        let ledger = TransactionRepository::new(db);
        let (current, incoming, outgoing) = accounts(&account_repository, 1).await;

        ledger
            .record_entry(TransactionEntry::new(1, "a".into(), &current, &incoming, 100))
            .await
            .unwrap();

        let rejected = ledger
            .record_entry(TransactionEntry::new(1, "b".into(), &outgoing, &current, 500))
            .await;

        assert_eq!(rejected.unwrap_err(), LedgerError::InsufficientBalance);
        assert_eq!(ledger.balance_of(1).await.unwrap(), 100);
        assert!(ledger.entries_for_invoice("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exact_balance_can_be_spent() {
        let db = test_db().await;
        let account_repository = AccountRepository::new(db.clone());
        let ledger = TransactionRepository::new(db);
        let (current, incoming, outgoing) = accounts(&account_repository, 4).await;

        ledger
            .record_entry(TransactionEntry::new(4, "a".into(), &current, &incoming, 100))
            .await
            .unwrap();
        ledger
            .record_entry(TransactionEntry::new(4, "b".into(), &outgoing, &current, 100))
            .await
            .unwrap();

        assert_eq!(ledger.balance_of(4).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_debits_cannot_jointly_overdraft() {
        let db = test_db().await;
        let account_repository = AccountRepository::new(db.clone());
        let ledger = TransactionRepository::new(db);
        let (current, incoming, outgoing) = accounts(&account_repository, 2).await;

        ledger
            .record_entry(TransactionEntry::new(2, "fund".into(), &current, &incoming, 1000))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            ledger.record_entry(TransactionEntry::new(2, "x".into(), &outgoing, &current, 600)),
            ledger.record_entry(TransactionEntry::new(2, "y".into(), &outgoing, &current, 600)),
        );

        assert!(first.is_ok() != second.is_ok());
        assert_eq!(ledger.balance_of(2).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_debits_bump_the_account_guard() {
        let db = test_db().await;
        let account_repository = AccountRepository::new(db.clone());
        let ledger = TransactionRepository::new(db);
        let (current, incoming, outgoing) = accounts(&account_repository, 6).await;

        ledger
            .record_entry(TransactionEntry::new(6, "a".into(), &current, &incoming, 100))
            .await
            .unwrap();
        ledger
            .record_entry(TransactionEntry::new(6, "b".into(), &outgoing, &current, 40))
            .await
            .unwrap();
        let refused = ledger
            .record_entry(TransactionEntry::new(6, "c".into(), &outgoing, &current, 500))
            .await;
        assert_eq!(refused.unwrap_err(), LedgerError::InsufficientBalance);

        let stored = account_repository
            .find(&current.key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.guard_seq, 2);
        assert_eq!(ledger.balance_of(6).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_fee_entries_bypass_the_guard() {
        let db = test_db().await;
        let account_repository = AccountRepository::new(db.clone());
        let ledger = TransactionRepository::new(db);
        let (current, _, _) = accounts(&account_repository, 3).await;
        let fees = account_repository
            .account_for(3, AccountKind::Fees)
            .await
            .unwrap();

        let fee = ledger
            .record_entry(
                TransactionEntry::new(3, "a".into(), &fees, &current, 5).with_parent("p".into()),
            )
            .await
            .unwrap();

        assert_eq!(fee.parent_id.as_deref(), Some("p"));
        assert_eq!(ledger.balance_of(3).await.unwrap(), -5);
    }

    #[tokio::test]
    async fn test_zero_amount_only_for_fee_entries() {
        let db = test_db().await;
        let account_repository = AccountRepository::new(db.clone());
        let ledger = TransactionRepository::new(db);
        let (current, incoming, _) = accounts(&account_repository, 5).await;
        let fees = account_repository
            .account_for(5, AccountKind::Fees)
            .await
            .unwrap();

        let principal = ledger
            .record_entry(TransactionEntry::new(5, "a".into(), &current, &incoming, 0))
            .await;
        assert_eq!(principal.unwrap_err(), LedgerError::InvalidAmount(0));

        ledger
            .record_entry(
                TransactionEntry::new(5, "a".into(), &fees, &current, 0).with_parent("p".into()),
            )
            .await
            .unwrap();
        assert_eq!(ledger.entries_for_user(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_debit_account() {
        let db = test_db().await;
        let ledger = TransactionRepository::new(db);
        let ghost = Account::new(8, AccountKind::Current);

        let res = ledger
            .record_entry(TransactionEntry::new(8, "a".into(), &ghost, &ghost, 10))
            .await;

        assert!(matches!(res, Err(LedgerError::NotFound(_))));
    }
}
