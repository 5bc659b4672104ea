//! An in-process stand-in for an AMQP broker, selected via
//! [`crate::config::Transport::Memory`]. Exchange routing is simplified to exact routing-key
//! matches for direct/topic exchanges and broadcast-to-all-bindings for fanout; no wildcard
//! topic patterns are implemented, since none of this crate's scenarios need them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::{Broker, BrokerChannel, BrokerDelivery};
use crate::error::{Error, Result};
use crate::exchange::ExchangeKind;

#[derive(Clone, Default)]
pub(crate) struct MemoryBroker {
    registry: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    state: Mutex<RegistryState>,
    down: AtomicBool,
}

#[derive(Default)]
struct RegistryState {
    exchanges: HashMap<String, ExchangeEntry>,
    queues: HashMap<String, QueueHandle>,
}

struct ExchangeEntry {
    kind: ExchangeKind,
    bindings: Vec<(String, String)>,
}

#[derive(Clone)]
struct QueueHandle {
    sender: mpsc::UnboundedSender<RawDelivery>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<RawDelivery>>>,
}

struct RawDelivery {
    payload: Vec<u8>,
    redelivered: bool,
}

impl MemoryBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Simulates the broker connection dropping out from under every active
    /// [`BrokerChannel`] handed out by this broker. The next delivery drained from any live
    /// consumer surfaces [`Error::BrokerUnreachable`] once; a subsequent [`Broker::channel`]
    /// call (as performed by [`crate::connection::Connection::reconnect`]) clears the fault.
    #[cfg_attr(not(any(test, feature = "test-util")), allow(dead_code))]
    pub(crate) fn force_disconnect(&self) {
        self.registry.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn channel(&self) -> Result<Box<dyn BrokerChannel>> {
        self.registry.down.store(false, Ordering::SeqCst);
        Ok(Box::new(MemoryChannel {
            registry: self.registry.clone(),
        }))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct MemoryChannel {
    registry: Arc<Registry>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, _durable: bool, _auto_delete: bool) -> Result<()> {
        let mut state = self.registry.state.lock().await;
        state
            .exchanges
            .entry(name.to_string())
            .or_insert_with(|| ExchangeEntry { kind, bindings: Vec::new() });
        Ok(())
    }

    async fn declare_queue(&self, name: &str, _durable: bool, _auto_delete: bool, _exclusive: bool) -> Result<String> {
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };
        let mut state = self.registry.state.lock().await;
        state.queues.entry(name.clone()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            QueueHandle {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            }
        });
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.registry.state.lock().await;
        let entry = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| Error::UnknownExchange(exchange.to_string()))?;
        let binding = (routing_key.to_string(), queue.to_string());
        if !entry.bindings.contains(&binding) {
            entry.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _tag: &str) -> Result<BoxStream<'static, Result<BrokerDelivery>>> {
        let handle = {
            let state = self.registry.state.lock().await;
            state
                .queues
                .get(queue)
                .cloned()
                .ok_or_else(|| Error::UnknownQueue(queue.to_string()))?
        };
        let registry = self.registry.clone();
        let stream = stream::unfold((handle, registry, false), |(handle, registry, reported)| async move {
            if registry.down.load(Ordering::SeqCst) && !reported {
                return Some((Err(Error::BrokerUnreachable { after_retries: 0 }), (handle, registry, true)));
            }
            let raw = {
                let mut receiver = handle.receiver.lock().await;
                receiver.recv().await
            };
            let raw = raw?;
            let delivery = BrokerDelivery::new(raw.payload, raw.redelivered, Box::new(|| Box::pin(async { Ok(()) })));
            Some((Ok(delivery), (handle, registry, reported)))
        });
        Ok(Box::pin(stream))
    }

    async fn cancel(&self, _tag: &str) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        if self.registry.down.load(Ordering::SeqCst) {
            return Err(Error::BrokerUnreachable { after_retries: 0 });
        }
        let state = self.registry.state.lock().await;
        let entry = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| Error::UnknownExchange(exchange.to_string()))?;
        let targets: Vec<&String> = match entry.kind {
            ExchangeKind::Fanout => entry.bindings.iter().map(|(_, queue)| queue).collect(),
            ExchangeKind::Direct | ExchangeKind::Topic => entry
                .bindings
                .iter()
                .filter(|(key, _)| key == routing_key)
                .map(|(_, queue)| queue)
                .collect(),
        };
        for queue in targets {
            if let Some(handle) = state.queues.get(queue) {
                // A closed receiver just means every consumer for this queue is gone; the
                // message is undeliverable, not an error.
                let _ = handle.sender.send(RawDelivery {
                    payload: payload.clone(),
                    redelivered: false,
                });
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
