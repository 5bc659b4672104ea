//! The server-side method dispatcher: decodes a request envelope, looks up the registered
//! method by name, runs it on a bounded worker pool, and publishes its reply (or failure) back
//! to the caller's direct reply queue. Methods are looked up by name within one shared queue,
//! rather than one queue per method.

mod extract;
mod handler;
mod handler_error;
mod reply;

pub use extract::{Args, Extract, RawArgs, State};
pub use handler::Handler;
pub use handler_error::HandlerError;
pub use reply::Reply;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::context::Context;
use crate::envelope::{Envelope, ReplyEnvelope};
use crate::error::Result;
use crate::exchange::ExchangeKind;
use crate::pool::Pool;

pub(crate) use extract::Extract;

/// A handle used to publish replies back to a caller's direct reply queue, threaded through
/// every [`Ctx`] so handlers can reply multiple times (for streamed results) without the
/// dispatcher needing to see into their bodies.
#[derive(Clone)]
pub(crate) struct ReplySink {
    pool: Arc<Pool>,
}

impl ReplySink {
    pub(crate) fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    async fn publish(&self, msg_id: &str, envelope: ReplyEnvelope) -> Result<()> {
        let payload = serde_json::to_vec(&envelope)?;
        let msg_id = msg_id.to_string();
        self.pool
            .with_connection(move |conn| -> BoxFuture<'_, Result<()>> {
                let msg_id = msg_id.clone();
                let payload = payload.clone();
                Box::pin(async move { conn.publisher_send(ExchangeKind::Direct, &msg_id, &payload).await })
            })
            .await
    }
}

/// The reconstructed request context bound to a specific reply target, handed to handlers that
/// extract it via [`Ctx`]'s [`Extract`] impl.
#[derive(Clone)]
pub struct Ctx {
    /// The reconstructed ambient context fields.
    pub inner: Context,
    msg_id: Option<String>,
    replies: ReplySink,
}

impl Ctx {
    /// Publishes one reply item. A no-op if this request was not made through `call`/`multicall`
    /// (i.e. had no reply-queue id attached), matching `cast`'s fire-and-forget semantics.
    pub async fn reply(&self, result: Value, failure: Option<(String, String, Vec<String>)>) {
        let Some(msg_id) = &self.msg_id else {
            return;
        };
        if let Err(e) = self.replies.publish(msg_id, ReplyEnvelope { result, failure }).await {
            tracing::error!(msg_id = %msg_id, "failed to publish reply: {e:#}");
        }
    }

    async fn send_terminator(&self) {
        let Some(msg_id) = &self.msg_id else {
            return;
        };
        if let Err(e) = self.replies.publish(msg_id, ReplyEnvelope::terminator()).await {
            tracing::error!(msg_id = %msg_id, "failed to publish multicall terminator: {e:#}");
        }
    }
}

impl std::ops::Deref for Ctx {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.inner
    }
}

/// A single decoded request, passed by `&mut` to each [`Extract`] implementation in turn.
pub struct DispatchRequest<S> {
    state: Arc<S>,
    ctx: Ctx,
    args: Value,
}

impl<S> DispatchRequest<S> {
    /// The reconstructed request context.
    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    /// The request's undecoded `args` value.
    pub fn args(&self) -> &Value {
        &self.args
    }
}

type BoxedMethod<S> = Box<dyn Fn(DispatchRequest<S>) -> BoxFuture<'static, Result<Reply, HandlerError>> + Send + Sync>;

/// A registry of named methods dispatched against a single shared application state `S`.
///
/// Registered with [`ProxyDispatcher::method`] and served with
/// [`crate::rpc::Transport::serve_topic`]/[`crate::rpc::Transport::serve_fanout`].
pub struct ProxyDispatcher<S> {
    methods: HashMap<String, BoxedMethod<S>>,
    state: Arc<S>,
    worker_permits: Arc<Semaphore>,
}

impl<S: Send + Sync + 'static> ProxyDispatcher<S> {
    /// Builds a dispatcher over `state`, processing at most `worker_pool_size` requests
    /// concurrently.
    pub fn new(state: S, worker_pool_size: usize) -> Self {
        Self {
            methods: HashMap::new(),
            state: Arc::new(state),
            worker_permits: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        }
    }

    /// Registers `handler` under `name`. Chainable; typically called once per method before
    /// handing the dispatcher off to `serve_topic`/`serve_fanout`.
    pub fn method<H, Args, Res>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args, Res, S>,
        Args: Send + 'static,
        Res: Into<Reply> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!(method = %name, "registering method");
        self.methods.insert(
            name,
            Box::new(move |mut req: DispatchRequest<S>| {
                let handler = handler.clone();
                Box::pin(async move { handler.call(&mut req).await.map(Into::into) })
            }),
        );
        self
    }

    /// Decodes one envelope and, if it names a `method`, spawns its handling onto the worker
    /// pool, bounded by `worker_pool_size` concurrent in-flight requests. A request with no
    /// `method` field is rejected here, before any worker-pool permit is acquired, matching the
    /// original's `if not method:` check running ahead of its own pool dispatch.
    pub(crate) fn dispatch(self: &Arc<Self>, payload: Vec<u8>, replies: ReplySink) {
        let mut envelope = match serde_json::from_slice::<Value>(&payload) {
            Ok(Value::Object(map)) => Envelope::from(map),
            Ok(_) | Err(_) => {
                tracing::warn!("received a request that was not a JSON object, dropping");
                return;
            }
        };

        let (msg_id, context_fields) = envelope.unpack_context();
        let ctx = Ctx {
            inner: Context::from_fields(context_fields),
            msg_id,
            replies,
        };

        let Some(method) = envelope.method_name().map(str::to_string) else {
            tracing::warn!("request had no `method` field");
            tokio::spawn(async move {
                ctx.reply(
                    Value::Null,
                    Some(("MalformedRequest".to_string(), "request had no `method` field".to_string(), Vec::new())),
                )
                .await;
            });
            return;
        };

        let args = envelope.args_value();
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = dispatcher.worker_permits.clone().acquire_owned().await else {
                return;
            };
            dispatcher.handle_one(method, args, ctx).await;
        });
    }

    async fn handle_one(&self, method: String, args: Value, ctx: Ctx) {
        let Some(handler) = self.methods.get(&method) else {
            tracing::warn!(%method, "no handler registered for method");
            ctx.reply(
                Value::Null,
                Some(("UnknownMethod".to_string(), format!("no method named {method:?} is registered"), Vec::new())),
            )
            .await;
            return;
        };

        let request = DispatchRequest {
            state: self.state.clone(),
            ctx: ctx.clone(),
            args,
        };

        match handler(request).await {
            Ok(Reply::Single(value)) => {
                ctx.reply(value, None).await;
                ctx.send_terminator().await;
            }
            Ok(Reply::Stream(mut stream)) => {
                while let Some(item) = stream.next().await {
                    ctx.reply(item, None).await;
                }
                ctx.send_terminator().await;
            }
            Err(e) => {
                tracing::error!(%method, "handler failed: {e}");
                ctx.reply(Value::Null, Some((e.kind, e.message, Vec::new()))).await;
            }
        }
    }
}
