//! The client-facing RPC verbs (`call`, `multicall`, `cast`, `fanout_cast`) and the server-side
//! `serve_topic`/`serve_fanout` entry points, all hung off one [`Transport`] handle. The
//! connection pool is owned by the `Transport` value itself rather than reached through
//! module-level state.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker;
use crate::config::TransportConfig;
use crate::context::RequestContext;
use crate::dispatcher::{ProxyDispatcher, ReplySink};
use crate::envelope::{Envelope, ReplyEnvelope};
use crate::error::{Error, RemoteError, Result};
use crate::exchange::ExchangeKind;
use crate::pool::Pool;

/// A connected transport: owns a pool of client connections, and is the entry point for every
/// RPC verb plus server-side dispatch.
#[derive(Clone)]
pub struct Transport {
    pool: Arc<Pool>,
}

impl Transport {
    /// Connects to the broker named by `config.transport`, eagerly validating that it is
    /// reachable (subject to `config.retry`).
    pub async fn connect(config: TransportConfig) -> Result<Self> {
        let config = Arc::new(config);
        let broker = broker::connect(&config).await?;
        let pool = Pool::new(broker, config);
        Ok(Self { pool })
    }

    /// Fire-and-forget: publishes `envelope` to `topic` and returns as soon as the broker has
    /// accepted it. Exactly one bound consumer (of potentially many sharing the topic) will
    /// receive it.
    pub async fn cast<C: RequestContext>(&self, ctx: &C, topic: &str, mut envelope: Envelope) -> Result<()> {
        envelope.pack_context(ctx);
        let topic = topic.to_string();
        let payload = envelope.to_bytes()?;
        self.pool
            .with_connection(move |conn| -> BoxFuture<'_, Result<()>> {
                let topic = topic.clone();
                let payload = payload.clone();
                Box::pin(async move { conn.publisher_send(ExchangeKind::Topic, &topic, &payload).await })
            })
            .await
    }

    /// Fire-and-forget broadcast: publishes `envelope` to every consumer bound to `topic`'s
    /// fanout exchange.
    pub async fn fanout_cast<C: RequestContext>(&self, ctx: &C, topic: &str, mut envelope: Envelope) -> Result<()> {
        envelope.pack_context(ctx);
        let topic = topic.to_string();
        let payload = envelope.to_bytes()?;
        self.pool
            .with_connection(move |conn| -> BoxFuture<'_, Result<()>> {
                let topic = topic.clone();
                let payload = payload.clone();
                Box::pin(async move { conn.publisher_send(ExchangeKind::Fanout, &topic, &payload).await })
            })
            .await
    }

    /// Sends `envelope` to `topic` and returns a lazily-driven sequence of reply items,
    /// terminated by the handler's `(None, None)` marker. Use this directly for handlers
    /// registered with a [`crate::dispatcher::Reply::stream`] response; use [`Transport::call`]
    /// for handlers that reply once.
    pub async fn multicall<C: RequestContext>(&self, ctx: &C, topic: &str, mut envelope: Envelope) -> Result<MulticallWaiter> {
        let msg_id = Uuid::new_v4().simple().to_string();
        envelope.set_msg_id(&msg_id);
        envelope.pack_context(ctx);
        let payload = envelope.to_bytes()?;

        let mut conn = self.pool.acquire().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let callback = Arc::new(move |payload: Vec<u8>| -> Result<()> {
            let envelope: ReplyEnvelope = serde_json::from_slice(&payload)?;
            tx.send(envelope).map_err(|_| Error::ReplyChannelClosed)?;
            Ok(())
        });
        conn.create_consumer(ExchangeKind::Direct, &msg_id, callback).await?;
        conn.publisher_send(ExchangeKind::Topic, topic, &payload).await?;

        Ok(MulticallWaiter {
            conn: Some(conn),
            rx,
            done: false,
        })
    }

    /// Sends `envelope` to `topic` and waits for the single reply (or last of several, if the
    /// handler streamed more than one). Prefer `multicall` directly when you expect — and want
    /// to process incrementally — more than one reply item.
    pub async fn call<C: RequestContext>(&self, ctx: &C, topic: &str, envelope: Envelope) -> Result<Value> {
        let mut waiter = self.multicall(ctx, topic, envelope).await?;
        let mut last = Value::Null;
        while let Some(item) = waiter.next().await {
            last = item?;
        }
        Ok(last)
    }

    /// Returns the in-memory broker backing this transport, for tests that need to simulate a
    /// broker outage. Only meaningful when connected with
    /// [`crate::config::Transport::Memory`]; returns `None` otherwise.
    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn memory_broker(&self) -> Option<crate::broker::MemoryBroker> {
        self.pool.broker().as_any().downcast_ref::<crate::broker::MemoryBroker>().cloned()
    }

    /// Runs `dispatcher` against every message published to `topic`'s topic exchange, on a
    /// dedicated (non-pooled) connection. Returns a handle that stops the loop when dropped or
    /// explicitly stopped.
    pub fn serve_topic<S: Send + Sync + 'static>(&self, topic: &str, dispatcher: Arc<ProxyDispatcher<S>>) -> ServeHandle {
        self.serve(ExchangeKind::Topic, topic, dispatcher)
    }

    /// Runs `dispatcher` against every message broadcast to `topic`'s fanout exchange, on a
    /// dedicated (non-pooled) connection.
    pub fn serve_fanout<S: Send + Sync + 'static>(&self, topic: &str, dispatcher: Arc<ProxyDispatcher<S>>) -> ServeHandle {
        self.serve(ExchangeKind::Fanout, topic, dispatcher)
    }

    fn serve<S: Send + Sync + 'static>(&self, kind: ExchangeKind, topic: &str, dispatcher: Arc<ProxyDispatcher<S>>) -> ServeHandle {
        let pool = self.pool.clone();
        let config_topic = topic.to_string();
        let join = tokio::spawn(async move {
            let mut conn = match pool.open_dedicated().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(topic = %config_topic, "failed to establish dispatcher connection: {e:#}");
                    return;
                }
            };

            let replies = ReplySink::new(pool);
            let callback: crate::endpoint::Callback = {
                let dispatcher = dispatcher.clone();
                let replies = replies.clone();
                Arc::new(move |payload: Vec<u8>| {
                    dispatcher.dispatch(payload, replies.clone());
                    Ok(())
                })
            };

            if let Err(e) = conn.create_consumer(kind, &config_topic, callback).await {
                tracing::error!(topic = %config_topic, "failed to set up dispatcher consumer: {e:#}");
                return;
            }

            loop {
                if let Err(e) = conn.drain_next().await {
                    tracing::error!(topic = %config_topic, "dispatcher loop hit an unrecoverable error, retrying shortly: {e:#}");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        });
        ServeHandle(join)
    }
}

/// A running server-side dispatch loop. Dropping this stops the loop.
pub struct ServeHandle(tokio::task::JoinHandle<()>);

impl ServeHandle {
    /// Stops the dispatch loop immediately.
    pub fn stop(self) {
        self.0.abort();
    }
}

impl Drop for ServeHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A lazily-driven sequence of reply items for one `call`/`multicall`, ending when the
/// handler's `(None, None)` terminator is received. Mirrors `MulticallWaiter.__iter__`, with
/// Python's `StopIteration`/`RemoteError` raising replaced by `Option`/`Result`.
pub struct MulticallWaiter {
    conn: Option<crate::pool::PooledConnection>,
    rx: mpsc::UnboundedReceiver<ReplyEnvelope>,
    done: bool,
}

impl MulticallWaiter {
    /// Returns the next reply item, `None` once the terminator has been received (after which
    /// this waiter's connection has already been released), or `Some(Err(_))` if the remote
    /// handler failed or the connection could not be drained.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        if self.done {
            return None;
        }
        let conn = self.conn.as_mut().expect("waiter connection released before completion");
        if let Err(e) = conn.drain_next().await {
            self.finish().await;
            return Some(Err(e));
        }
        let envelope = match self.rx.recv().await {
            Some(envelope) => envelope,
            None => {
                self.finish().await;
                return Some(Err(Error::ReplyChannelClosed));
            }
        };

        if let Some((kind, message, traceback)) = envelope.failure {
            self.finish().await;
            return Some(Err(Error::Remote(RemoteError { kind, message, traceback })));
        }

        if envelope.is_terminator() {
            self.finish().await;
            return None;
        }

        Some(Ok(envelope.result))
    }

    async fn finish(&mut self) {
        self.done = true;
        if let Some(conn) = self.conn.take() {
            conn.release().await;
        }
    }
}
