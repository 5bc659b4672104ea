//! The publisher endpoint: declares its exchange eagerly and sends pre-serialized payloads to
//! it. Mirrors `DirectPublisher`/`TopicPublisher`/`FanoutPublisher` from the original
//! implementation, unified behind one struct parameterized by [`EndpointOptions`].

use crate::broker::BrokerChannel;
use crate::error::Result;
use crate::exchange::EndpointOptions;

pub(crate) struct Publisher {
    exchange_name: String,
    routing_key: String,
}

impl Publisher {
    pub(crate) async fn declare(channel: &dyn BrokerChannel, options: EndpointOptions) -> Result<Self> {
        channel
            .declare_exchange(&options.exchange_name, options.exchange_kind, options.durable, options.auto_delete)
            .await?;
        Ok(Self {
            exchange_name: options.exchange_name,
            routing_key: options.routing_key,
        })
    }

    pub(crate) async fn send(&self, channel: &dyn BrokerChannel, payload: Vec<u8>) -> Result<()> {
        channel.publish(&self.exchange_name, &self.routing_key, payload).await
    }
}
