//! The consumer endpoint: declares its exchange/queue/binding eagerly, but does not start
//! receiving deliveries until [`Consumer::start`] is called — mirroring the original
//! `Connection.declare_consumer`/`Connection.consume` split between declaring topology and
//! actually registering for delivery.

use futures::stream::BoxStream;

use super::Callback;
use crate::broker::BrokerChannel;
use crate::error::{Error, Result};
use crate::exchange::EndpointOptions;

pub(crate) struct Consumer {
    tag: String,
    queue_name: String,
    options: EndpointOptions,
    callback: Callback,
    stream: Option<BoxStream<'static, Result<crate::broker::BrokerDelivery>>>,
}

impl Consumer {
    pub(crate) async fn declare(
        channel: &dyn BrokerChannel,
        options: EndpointOptions,
        callback: Callback,
        tag: String,
    ) -> Result<Self> {
        channel
            .declare_exchange(&options.exchange_name, options.exchange_kind, options.durable, options.auto_delete)
            .await?;
        let queue_name = channel
            .declare_queue(
                options.queue_name.as_deref().unwrap_or(""),
                options.durable,
                options.auto_delete,
                options.exclusive,
            )
            .await?;
        channel.bind_queue(&queue_name, &options.exchange_name, &options.routing_key).await?;
        Ok(Self {
            tag,
            queue_name,
            options,
            callback,
            stream: None,
        })
    }

    /// Whether this consumer needs [`Consumer::start`] called before it can be drained.
    pub(crate) fn needs_start(&self) -> bool {
        self.stream.is_none()
    }

    /// Registers this consumer for delivery. `nowait` mirrors the original consume-ok
    /// handshake toggle (all but the last consumer registered in a batch skip waiting for the
    /// broker's acknowledgment); this crate's backends resolve the underlying future either
    /// way, so the flag is kept for documentation of call order rather than changing behavior.
    pub(crate) async fn start(&mut self, channel: &dyn BrokerChannel, nowait: bool) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        tracing::trace!(tag = %self.tag, nowait, queue = %self.queue_name, "starting consumer");
        self.stream = Some(channel.consume(&self.queue_name, &self.tag).await?);
        Ok(())
    }

    pub(crate) fn poll(&mut self) -> Option<&mut BoxStream<'static, Result<crate::broker::BrokerDelivery>>> {
        self.stream.as_mut()
    }

    pub(crate) fn invoke_callback(&self, payload: Vec<u8>) -> Result<()> {
        (self.callback)(payload)
    }

    /// Cancels this consumer, tolerating the broker reporting the tag as already unknown.
    pub(crate) async fn cancel(&mut self, channel: &dyn BrokerChannel) -> Result<()> {
        match channel.cancel(&self.tag).await {
            Ok(()) => Ok(()),
            Err(Error::UnknownConsumerTag(tag)) if tag == self.tag => {
                tracing::debug!(tag = %self.tag, "broker reported unknown tag on cancel, ignoring");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-declares this consumer's topology against a freshly (re)opened channel and forgets
    /// its delivery stream, so the next [`Consumer::start`] call re-subscribes.
    pub(crate) async fn rebind(&mut self, channel: &dyn BrokerChannel) -> Result<()> {
        self.stream = None;
        channel
            .declare_exchange(
                &self.options.exchange_name,
                self.options.exchange_kind,
                self.options.durable,
                self.options.auto_delete,
            )
            .await?;
        let queue_name = channel
            .declare_queue(&self.queue_name, self.options.durable, self.options.auto_delete, self.options.exclusive)
            .await?;
        channel
            .bind_queue(&queue_name, &self.options.exchange_name, &self.options.routing_key)
            .await?;
        self.queue_name = queue_name;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;

    /// A stub channel whose only job is to make [`Consumer::cancel`]'s tolerance of an
    /// unknown-tag error observable without a real broker backend.
    struct AlwaysUnknownTag;

    #[async_trait]
    impl BrokerChannel for AlwaysUnknownTag {
        async fn declare_exchange(&self, _: &str, _: crate::exchange::ExchangeKind, _: bool, _: bool) -> Result<()> {
            Ok(())
        }
        async fn declare_queue(&self, name: &str, _: bool, _: bool, _: bool) -> Result<String> {
            Ok(name.to_string())
        }
        async fn bind_queue(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn consume(&self, _: &str, _: &str) -> Result<BoxStream<'static, Result<crate::broker::BrokerDelivery>>> {
            Ok(Box::pin(stream::empty()))
        }
        async fn cancel(&self, tag: &str) -> Result<()> {
            Err(Error::UnknownConsumerTag(tag.to_string()))
        }
        async fn publish(&self, _: &str, _: &str, _: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancel_tolerates_unknown_tag_for_its_own_consumer() {
        let channel = AlwaysUnknownTag;
        let options = crate::exchange::EndpointOptions::for_kind(
            crate::exchange::ExchangeKind::Direct,
            &crate::config::TransportConfig::in_memory(),
            "some-msg-id",
        );
        let mut consumer = Consumer::declare(&channel, options, std::sync::Arc::new(|_| Ok(())), "some-msg-id".to_string())
            .await
            .unwrap();
        assert!(consumer.cancel(&channel).await.is_ok());
    }
}
