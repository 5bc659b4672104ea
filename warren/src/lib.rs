//! `warren` is an AMQP-backed RPC transport for a cloud-compute control plane: point-to-point
//! `call`/`cast`, load-balanced topic dispatch, and fanout broadcast, all built on
//! [`lapin`](https://github.com/amqp-rs/lapin).
//!
//! ```no_run
//! use warren::{Context, Envelope, ProxyDispatcher, Reply, Transport, TransportConfig};
//!
//! #[derive(Clone)]
//! struct AppState;
//!
//! async fn echo(args: warren::Args<serde_json::Value>) -> Result<Reply, warren::HandlerError> {
//!     Ok(Reply::from(args.0))
//! }
//!
//! # async fn run() -> warren::Result<()> {
//! let transport = Transport::connect(TransportConfig::in_memory()).await?;
//! let dispatcher = std::sync::Arc::new(ProxyDispatcher::new(AppState, 8).method("echo", echo));
//! let _server = transport.serve_topic("demo", dispatcher);
//!
//! let reply = transport.call(&Context::new(), "demo", Envelope::for_method("echo").with_arg("value", 1)).await?;
//! assert_eq!(reply, serde_json::json!({"value": 1}));
//! # Ok(())
//! # }
//! ```

mod broker;
mod config;
mod connection;
mod context;
mod dispatcher;
mod endpoint;
mod envelope;
mod error;
mod exchange;
mod pool;
mod rpc;

pub use config::{RetryExhaustedPolicy, RetryPolicy, Transport as TransportKind, TransportConfig};
pub use context::{Context, RequestContext};
pub use dispatcher::{Args, Ctx, DispatchRequest, Handler, HandlerError, ProxyDispatcher, RawArgs, Reply, State};
pub use envelope::Envelope;
pub use error::{Error, RemoteError, Result};
pub use rpc::{MulticallWaiter, ServeHandle, Transport};

#[cfg(test)]
mod tests;
