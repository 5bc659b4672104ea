//! Endpoint objects: the consumer and publisher wrappers a [`crate::connection::Connection`]
//! owns, one per queue/exchange pair it talks through. Per-exchange-kind differences are
//! resolved once, in [`crate::exchange::EndpointOptions::for_kind`], rather than by
//! subclassing a base consumer/publisher type.

pub(crate) mod consumer;
pub(crate) mod publisher;

pub(crate) use consumer::Consumer;
pub(crate) use publisher::Publisher;

use crate::error::Result;

/// Callback invoked with a delivery's raw payload once a consumer's message is ready to
/// dispatch. Returning `Err` suppresses the ack (the message will be redelivered).
pub(crate) type Callback = std::sync::Arc<dyn Fn(Vec<u8>) -> Result<()> + Send + Sync>;
