use amqprs::channel::{
    BasicAckArguments, BasicConsumeArguments, BasicNackArguments, BasicQosArguments, Channel,
    QueueBindArguments, QueueDeclareArguments,
};
use amqprs::connection::Connection;
use amqprs::consumer::AsyncConsumer;
use amqprs::{BasicProperties, Deliver};
use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Notify;

use crate::messages::LightningNodeEvent;
use crate::{config::RabbitMqConfig, rabbitmq};

/// Subscriber side of the Lightning node event exchange.
pub struct LightningNodeEvents {
    pub config: RabbitMqConfig,
    pub connection: Connection,
    pub channel: Channel,
}

impl LightningNodeEvents {
    pub async fn new(config: RabbitMqConfig) -> Result<Self> {
        let connection = rabbitmq::get_rabbitmq_connection(&config).await?;

        let channel = rabbitmq::open_channel(&connection).await?;
        rabbitmq::ensure_exchange_created(&channel, &config.lightning_node_exchange, "fanout")
            .await?;

        Ok(Self {
            config,
            connection,
            channel,
        })
    }

    /// Binds `queue` to the node exchange and feeds every invoice update to
    /// `processor`. Never returns while the connection stays open.
    pub async fn subscribe_invoice_updates<F>(&self, queue: &str, processor: F) -> Result<()>
    where
        F: InvoiceUpdateProcessor + Send + Sync + 'static,
    {
        let (queue_name, _, _) = match self
            .channel
            .queue_declare(QueueDeclareArguments::durable_client_named(queue))
            .await?
        {
            Some(declared) => declared,
            None => bail!("Queue {} was not declared", queue),
        };

        let routing_key = "*";
        self.channel
            .queue_bind(QueueBindArguments::new(
                &queue_name,
                &self.config.lightning_node_exchange,
                routing_key,
            ))
            .await?;

        if !self.channel.is_connection_open() {
            bail!("Connection is closed");
        }

        self.channel
            .basic_qos(BasicQosArguments::new(0, self.config.rabbitmq_prefetch, false))
            .await?;

        let args = BasicConsumeArguments::new(&queue_name, "");
        self.channel
            .basic_consume(InvoiceUpdatesConsumer { processor }, args)
            .await?;

        info!("Consuming invoice updates from {}", queue_name);

        let guard = Notify::new();
        guard.notified().await;

        Ok(())
    }
}

#[async_trait]
pub trait InvoiceUpdateProcessor {
    async fn invoice_updated(
        &self,
        payment_hash: String,
        settled: bool,
        amount_paid_sat: i64,
    ) -> Result<()>;
}

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
}

/// Decodes one message body and hands invoice updates to `processor`.
///
/// Undecodable messages and events other than invoice updates are acked and
/// dropped. A processor failure requeues the message so it is redelivered.
pub async fn dispatch<F>(processor: &F, content: &[u8]) -> Disposition
where
    F: InvoiceUpdateProcessor + Send + Sync,
{
    let event: LightningNodeEvent = match serde_json::from_slice(content) {
        Ok(event) => event,
        Err(err) => {
            warn!("Dropping undecodable node event: {}", err);
            return Disposition::Ack;
        }
    };

    match event {
        LightningNodeEvent::InvoiceUpdated {
            payment_hash,
            settled,
            amount_paid_sat,
        } => match processor
            .invoice_updated(payment_hash.clone(), settled, amount_paid_sat)
            .await
        {
            Ok(_) => Disposition::Ack,
            Err(err) => {
                warn!("Invoice update {} failed: {}", payment_hash, err);
                Disposition::Requeue
            }
        },
        // Payment results reach the ledger through the paying call.
        other => {
            debug!("Ignoring node event {:?}", other);
            Disposition::Ack
        }
    }
}

pub struct InvoiceUpdatesConsumer<F>
where
    F: InvoiceUpdateProcessor + Send + Sync + 'static,
{
    processor: F,
}

#[async_trait]
impl<F> AsyncConsumer for InvoiceUpdatesConsumer<F>
where
    F: InvoiceUpdateProcessor + Send + Sync + 'static,
{
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let result = match dispatch(&self.processor, &content).await {
            Disposition::Ack => {
                channel
                    .basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false))
                    .await
            }
            Disposition::Requeue => {
                channel
                    .basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, true))
                    .await
            }
        };

        if let Err(err) = result {
            warn!("Cannot settle delivery {}: {}", deliver.delivery_tag(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use super::{dispatch, Disposition, InvoiceUpdateProcessor};
    use crate::messages::LightningNodeEvent;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, bool, i64)>>,
        fail: bool,
    }

    #[async_trait]
    impl InvoiceUpdateProcessor for Recorder {
        async fn invoice_updated(
            &self,
            payment_hash: String,
            settled: bool,
            amount_paid_sat: i64,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((payment_hash, settled, amount_paid_sat));
            if self.fail {
                bail!("store unavailable");
            }
            Ok(())
        }
    }

    fn encode(event: LightningNodeEvent) -> Vec<u8> {
        serde_json::to_vec(&event).unwrap()
    }

    #[tokio::test]
    async fn test_invoice_update_is_dispatched() {
        let recorder = Recorder::default();
        let content = encode(LightningNodeEvent::InvoiceUpdated {
            payment_hash: "ab".repeat(32),
            settled: true,
            amount_paid_sat: 500,
        });

        assert_eq!(dispatch(&recorder, &content).await, Disposition::Ack);
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("ab".repeat(32), true, 500)]);
    }

    #[tokio::test]
    async fn test_failed_processing_is_requeued() {
        let recorder = Recorder {
            fail: true,
            ..Default::default()
        };
        let content = encode(LightningNodeEvent::InvoiceUpdated {
            payment_hash: "cd".repeat(32),
            settled: true,
            amount_paid_sat: 0,
        });

        assert_eq!(dispatch(&recorder, &content).await, Disposition::Requeue);
    }

    #[tokio::test]
    async fn test_other_events_are_acked_without_callback() {
        let recorder = Recorder::default();
        let failed = encode(LightningNodeEvent::PaymentFailed {
            payment_hash: "ef".repeat(32),
        });
        let successful = encode(LightningNodeEvent::PaymentSuccessful {
            payment_hash: "ab".repeat(32),
        });

        assert_eq!(dispatch(&recorder, &failed).await, Disposition::Ack);
        assert_eq!(dispatch(&recorder, &successful).await, Disposition::Ack);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let recorder = Recorder::default();

        assert_eq!(dispatch(&recorder, b"not json").await, Disposition::Ack);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_amount_defaults_to_zero() {
        let recorder = Recorder::default();
        let content = br#"{"InvoiceUpdated":{"payment_hash":"00","settled":false}}"#;

        assert_eq!(dispatch(&recorder, content).await, Disposition::Ack);
        assert_eq!(
            recorder.calls.lock().unwrap().as_slice(),
            &[("00".to_string(), false, 0)]
        );
    }
}
