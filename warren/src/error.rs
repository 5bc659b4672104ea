//! Error types for the transport core.

use thiserror::Error as ThisError;

/// Convenience alias for a result using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that may be raised by the transport itself: connection setup, the broker
/// abstraction, and publish/consume plumbing. See [`crate::dispatcher::HandlerError`] for
/// errors produced by user-registered methods.
#[derive(Debug, ThisError)]
pub enum Error {
    /// An underlying `lapin` call failed.
    #[error("an underlying `lapin` call failed: {0}")]
    Lapin(#[from] lapin::Error),

    /// The broker could not be reached after exhausting the configured retry budget and
    /// [`crate::config::RetryExhaustedPolicy::Surface`] was selected. With the default
    /// [`crate::config::RetryExhaustedPolicy::Fatal`] policy the process exits instead of this
    /// ever being constructed.
    #[error("AMQP broker unreachable after {after_retries} retries")]
    BrokerUnreachable {
        /// How many retry attempts were made before giving up.
        after_retries: u32,
    },

    /// The broker reported that a consumer tag was unknown during cancellation. This is
    /// tolerated for exactly the tag being cancelled (a known broker quirk) and otherwise
    /// treated as a real error.
    #[error("broker reported unknown consumer tag {0:?} during cancel")]
    UnknownConsumerTag(String),

    /// (Memory transport only.) A queue was consumed or bound to before it was declared.
    #[error("no such queue: {0:?}")]
    UnknownQueue(String),

    /// (Memory transport only.) A queue was bound to an exchange that was never declared.
    #[error("no such exchange: {0:?}")]
    UnknownExchange(String),

    /// One or more live consumers were cancelled by the broker and the drain loop has nothing
    /// left to multiplex.
    #[error("consumer(s) for connection were cancelled")]
    ConsumerCancelled,

    /// An envelope failed to encode or decode as JSON.
    #[error("failed to (de)serialize an envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// A [`crate::rpc::MulticallWaiter`]'s reply channel was closed before a reply arrived; this
    /// should only happen if the owning connection's drain loop panicked.
    #[error("reply channel closed before a reply was received")]
    ReplyChannelClosed,

    /// The server-side handler for a call raised an error, or a call was made against a topic
    /// with no registered handler for the requested method.
    #[error("remote error ({kind}): {message}")]
    Remote(RemoteError),
}

/// An error marshalled back from a remote handler invocation.
///
/// Carries the error's kind name, its string form, and a formatted backtrace, none of which
/// this crate attempts to re-parse into a native Rust error type (the kind is whatever string
/// the remote handler tagged its failure with).
#[derive(Debug, Clone, ThisError)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    /// The name of the error kind as reported by the remote handler.
    pub kind: String,
    /// The human-readable error message.
    pub message: String,
    /// A formatted backtrace/traceback, one entry per line, if the remote side provided one.
    pub traceback: Vec<String>,
}
