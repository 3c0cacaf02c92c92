use amqprs::{
    callbacks::{DefaultChannelCallback, DefaultConnectionCallback},
    channel::{Channel, ExchangeDeclareArguments},
    connection::{Connection, OpenConnectionArguments},
};
use anyhow::Result;
use log::info;

use crate::config::RabbitMqConfig;

pub async fn get_rabbitmq_connection(config: &RabbitMqConfig) -> Result<Connection> {
    info!(
        "Connecting RabbitMQ at {}:{}",
        config.rabbitmq_host, config.rabbitmq_port
    );

    let connection = Connection::open(&OpenConnectionArguments::new(
        &config.rabbitmq_host,
        config.rabbitmq_port,
        &config.rabbitmq_username,
        &config.rabbitmq_password,
    ))
    .await?;

    connection
        .register_callback(DefaultConnectionCallback)
        .await?;

    Ok(connection)
}

pub async fn open_channel(connection: &Connection) -> Result<Channel> {
    let channel = connection.open_channel(None).await?;
    channel.register_callback(DefaultChannelCallback).await?;

    Ok(channel)
}

pub async fn ensure_exchange_created(
    channel: &Channel,
    exchange_name: &str,
    exchange_type: &str,
) -> Result<()> {
    channel
        .exchange_declare(ExchangeDeclareArguments::new(exchange_name, exchange_type))
        .await?;

    Ok(())
}
