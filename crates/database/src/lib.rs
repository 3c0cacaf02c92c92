use anyhow::Result;
use config::SurrealDbConfig;
use log::info;
use surrealdb::{
    engine::{
        local::{Db, Mem},
        remote::ws::{Client, Wss},
    },
    opt::auth::Root,
    Connection, Surreal,
};

pub use surrealdb;

pub mod config;

/// Indexes backing the ledger lookups. Account keys are derived from
/// `(user_id, kind)`, the unique index is a second line behind that.
const SCHEMA: &str = "
    DEFINE INDEX account_owner ON TABLE account COLUMNS user_id, kind UNIQUE;
    DEFINE INDEX invoice_user_hash ON TABLE invoice COLUMNS user_id, r_hash;
    DEFINE INDEX invoice_hash ON TABLE invoice COLUMNS invoice_type, r_hash, state;
    DEFINE INDEX invoice_request ON TABLE invoice COLUMNS invoice_type, payment_request, state;
    DEFINE INDEX entry_credit ON TABLE transaction_entry COLUMNS credit_account_id;
    DEFINE INDEX entry_debit ON TABLE transaction_entry COLUMNS debit_account_id;
    DEFINE INDEX entry_invoice ON TABLE transaction_entry COLUMNS invoice_id;
    DEFINE INDEX entry_user ON TABLE transaction_entry COLUMNS user_id;
";

/// Connects to the remote database named by `config` and defines the schema.
pub async fn init_db(config: SurrealDbConfig) -> Result<Surreal<Client>> {
    let db: Surreal<Client> = Surreal::init();

    info!("Connecting ledger database at {}", config.db_endpoint);
    db.connect::<Wss>(config.db_endpoint.as_str()).await?;

    db.signin(Root {
        username: &config.db_user,
        password: &config.db_pass,
    })
    .await?;

    db.use_ns(config.db_namespace.as_str())
        .use_db(config.db_database.as_str())
        .await?;
    define_schema(&db).await?;

    Ok(db)
}

/// Embedded in-memory database, used by tests and single-process setups.
pub async fn init_mem_db(namespace: &str, database: &str) -> Result<Surreal<Db>> {
    let db = Surreal::new::<Mem>(()).await?;
    db.use_ns(namespace).use_db(database).await?;
    define_schema(&db).await?;

    Ok(db)
}

pub async fn define_schema<C>(db: &Surreal<C>) -> Result<()>
where
    C: Connection,
{
    info!("Defining ledger schema");
    db.query(SCHEMA).await?.check()?;
    Ok(())
}
