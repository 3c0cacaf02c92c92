use std::sync::Arc;

use database::surrealdb::{engine::local::Db, Surreal};

use crate::{
    config::HubConfig,
    entity::Invoice,
    gateway::mock::MockGateway,
    reporter::recording::RecordingReporter,
    LedgerHub,
};

pub async fn test_db() -> Surreal<Db> {
    let _ = env_logger::builder().is_test(true).try_init();
    database::init_mem_db("test", "test").await.unwrap()
}

pub struct Fixture {
    pub db: Surreal<Db>,
    pub hub: LedgerHub<Db>,
    pub gateway: Arc<MockGateway>,
    pub reporter: Arc<RecordingReporter>,
}

pub async fn fixture() -> Fixture {
    let gateway = Arc::new(MockGateway::new());
    let reporter = Arc::new(RecordingReporter::default());
    let db = test_db().await;
    let hub = LedgerHub::new(
        db.clone(),
        gateway.clone(),
        reporter.clone(),
        HubConfig::default(),
    )
    .await
    .unwrap();

    Fixture {
        db,
        hub,
        gateway,
        reporter,
    }
}

impl Fixture {
    /// Credits `amount` to the user through a settled incoming invoice.
    pub async fn fund(&self, user_id: i64, amount: i64) -> Invoice {
        let invoice = self
            .hub
            .invoices
            .add_incoming_invoice(user_id, amount, "deposit", "")
            .await
            .unwrap();

        self.hub
            .settlements
            .process_invoice_update(&invoice.r_hash, true, amount)
            .await
            .unwrap()
            .unwrap()
    }

    /// Stores an outgoing invoice for `bolt11` on behalf of the user.
    pub async fn outgoing(&self, user_id: i64, bolt11: &str) -> Invoice {
        let decoded = self
            .hub
            .invoices
            .decode_payment_request(bolt11)
            .await
            .unwrap();

        self.hub
            .invoices
            .add_outgoing_invoice(user_id, bolt11, &decoded)
            .await
            .unwrap()
    }
}
