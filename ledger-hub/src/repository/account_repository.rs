use database::surrealdb::{Connection, Surreal};
use log::debug;

use crate::{
    entity::{Account, AccountKind},
    error::{LedgerError, Result},
};

/// Resolves `(user, kind)` to its ledger account, creating it on first use.
pub struct AccountRepository<C>
where
    C: Connection,
{
    db: Surreal<C>,
}

impl<C> AccountRepository<C>
where
    C: Connection,
{
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    pub async fn account_for(&self, user_id: i64, kind: AccountKind) -> Result<Account> {
        let key = Account::key_for(user_id, kind);

        if let Some(account) = self.find(&key).await? {
            return Ok(account);
        }

        let created: Result<Option<Account>, _> = self
            .db
            .create(("account", key.clone()))
            .content(Account::new(user_id, kind))
            .await;

        match created {
            Ok(Some(account)) => {
                debug!("Created {} account for user {}", kind.as_str(), user_id);
                Ok(account)
            }
            // A concurrent first use won the insert, the record exists now.
            _ => match self.find(&key).await? {
                Some(account) => Ok(account),
                None => Err(LedgerError::Store(format!(
                    "cannot create account {}",
                    key
                ))),
            },
        }
    }

    pub async fn find(&self, key: &str) -> Result<Option<Account>> {
        let account: Option<Account> = self.db.select(("account", key.to_string())).await?;
        Ok(account)
    }
}
