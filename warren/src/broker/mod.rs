//! The broker abstraction.
//!
//! Everything above this layer ([`crate::connection::Connection`] and up) talks to
//! [`Broker`]/[`BrokerChannel`] trait objects, never to `lapin` directly. This lets the
//! transport be selected purely via [`crate::config::TransportConfig`], with an in-process
//! backend usable in tests without a running RabbitMQ.

mod lapin_broker;
mod memory_broker;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::future::BoxFuture;

use crate::config::{Transport, TransportConfig};
use crate::error::Result;
use crate::exchange::ExchangeKind;

pub(crate) use memory_broker::MemoryBroker;

/// A connected broker, capable of handing out fresh channels.
#[async_trait]
pub(crate) trait Broker: Send + Sync + 'static {
    async fn channel(&self) -> Result<Box<dyn BrokerChannel>>;

    /// Lets test code downcast back to the concrete backend (namely [`MemoryBroker`], to reach
    /// its fault-injection hooks) without widening this trait's real surface.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A single logical channel on a broker: exchange/queue topology plus publish and consume.
///
/// Method names and signatures deliberately mirror the subset of AMQP 0.9.1 operations the
/// original `impl_kombu.py` queue/publisher classes use, so both backends below can implement
/// it directly against their native API (`lapin::Channel` for real AMQP; a `HashMap` registry
/// for the in-memory fake).
#[async_trait]
pub(crate) trait BrokerChannel: Send + Sync + 'static {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool, auto_delete: bool) -> Result<()>;

    /// Declares a queue and returns its actual name (the broker may assign one when `name` is
    /// empty).
    async fn declare_queue(&self, name: &str, durable: bool, auto_delete: bool, exclusive: bool) -> Result<String>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Starts consuming `queue` under consumer tag `tag`, returning a stream of deliveries.
    async fn consume(&self, queue: &str, tag: &str) -> Result<BoxStream<'static, Result<BrokerDelivery>>>;

    /// Cancels a previously started consumer. An unknown tag is reported as
    /// [`crate::error::Error::UnknownConsumerTag`] rather than silently ignored so that callers
    /// (namely [`crate::endpoint::consumer::Consumer::cancel`]) can decide whether that specific
    /// quirk is tolerable.
    async fn cancel(&self, tag: &str) -> Result<()>;

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A single delivered message plus a way to acknowledge it.
pub(crate) struct BrokerDelivery {
    pub(crate) payload: Vec<u8>,
    #[allow(dead_code)]
    pub(crate) redelivered: bool,
    ack: Option<AckFn>,
}

pub(crate) type AckFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

impl BrokerDelivery {
    pub(crate) fn new(payload: Vec<u8>, redelivered: bool, ack: AckFn) -> Self {
        Self {
            payload,
            redelivered,
            ack: Some(ack),
        }
    }

    /// Acknowledges the delivery. A no-op if called more than once.
    pub(crate) async fn ack(mut self) -> Result<()> {
        match self.ack.take() {
            Some(ack) => ack().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for BrokerDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerDelivery")
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Connects to the backend named by `config.transport`.
pub(crate) async fn connect(config: &TransportConfig) -> Result<Arc<dyn Broker>> {
    match config.transport {
        Transport::Amqp => Ok(Arc::new(lapin_broker::LapinBroker::connect(config).await?)),
        Transport::Memory => Ok(Arc::new(MemoryBroker::new())),
    }
}
