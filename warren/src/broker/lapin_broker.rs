//! The real AMQP backend, a thin adapter from [`super::BrokerChannel`] onto `lapin`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::BasicProperties;

use super::{Broker, BrokerChannel, BrokerDelivery};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::exchange::ExchangeKind;

pub(crate) struct LapinBroker {
    connection: lapin::Connection,
}

impl LapinBroker {
    pub(crate) async fn connect(config: &TransportConfig) -> Result<Self> {
        let addr = format!(
            "amqp://{}:{}@{}:{}/{}",
            config.user, config.password, config.broker_host, config.broker_port, config.virtual_host
        );
        let connection = lapin::Connection::connect(&addr, lapin::ConnectionProperties::default()).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await?;
        Ok(Box::new(LapinChannel { channel }))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct LapinChannel {
    channel: lapin::Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool, auto_delete: bool) -> Result<()> {
        self.channel
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    durable,
                    auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, name: &str, durable: bool, auto_delete: bool, exclusive: bool) -> Result<String> {
        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable,
                    auto_delete,
                    exclusive,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, tag: &str) -> Result<BoxStream<'static, Result<BrokerDelivery>>> {
        let consumer = self
            .channel
            .basic_consume(queue, tag, BasicConsumeOptions::default(), FieldTable::default())
            .await?;
        let stream = consumer.map(|delivery| {
            let delivery = delivery.map_err(Error::Lapin)?;
            let Delivery {
                data,
                acker,
                redelivered,
                ..
            } = delivery;
            let ack: super::AckFn = Box::new(move || {
                Box::pin(async move { acker.ack(BasicAckOptions::default()).await.map_err(Error::Lapin) })
            });
            Ok(BrokerDelivery::new(data, redelivered, ack))
        });
        Ok(Box::pin(stream))
    }

    async fn cancel(&self, tag: &str) -> Result<()> {
        self.channel
            .basic_cancel(tag, BasicCancelOptions::default())
            .await
            .map_err(|_| Error::UnknownConsumerTag(tag.to_string()))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.channel
            .basic_publish(exchange, routing_key, BasicPublishOptions::default(), &payload, BasicProperties::default())
            .await?
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channel.close(200, "closing").await?;
        Ok(())
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        }
    }
}
