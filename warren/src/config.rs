//! Transport configuration.
//!
//! Unlike the global-flags style of the system this crate's RPC verbs are modeled on, every
//! knob lives on one explicit, `Deserialize`-able [`TransportConfig`] value that callers build
//! (or load from their own config file/env layer) and pass to [`crate::rpc::Transport::connect`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which broker backend a [`crate::rpc::Transport`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// A real AMQP 0.9.1 broker, reached via `lapin`.
    Amqp,
    /// An in-process fake broker with no external dependencies, for tests.
    Memory,
}

/// What to do once the retry budget for (re)connecting to the broker is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryExhaustedPolicy {
    /// Log the failure and exit the process. This mirrors the original system's behavior,
    /// which assumes a supervisor (e.g. an init system or orchestrator) will restart the
    /// service.
    Fatal,
    /// Return [`crate::error::Error::BrokerUnreachable`] to the caller instead of exiting.
    /// Useful for embedding this crate in a process that manages its own lifecycle.
    Surface,
}

/// The backoff schedule used while (re)connecting to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of connection attempts before giving up, or `None` to retry forever.
    pub max_retries: Option<u32>,
    /// Delay before the first retry.
    pub interval_start: Duration,
    /// Amount the delay grows by after each failed attempt.
    pub interval_step: Duration,
    /// Ceiling on the retry delay, regardless of how many attempts have been made.
    pub interval_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            interval_start: Duration::from_millis(500),
            interval_step: Duration::from_millis(500),
            interval_max: Duration::from_secs(30),
        }
    }
}

/// Everything a [`crate::rpc::Transport`] needs to connect to a broker and behave correctly
/// under partial failure. Implements `Deserialize` so it can be loaded directly from a config
/// file or environment layer, in the spirit of this crate's ambient configuration story.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Which backend to connect through.
    pub transport: Transport,
    /// Broker hostname (ignored for [`Transport::Memory`]).
    pub broker_host: String,
    /// Broker port (ignored for [`Transport::Memory`]).
    pub broker_port: u16,
    /// Broker username (ignored for [`Transport::Memory`]).
    pub user: String,
    /// Broker password (ignored for [`Transport::Memory`]).
    pub password: String,
    /// AMQP virtual host (ignored for [`Transport::Memory`]).
    pub virtual_host: String,
    /// The topic exchange that `call`/`cast`/`multicall` publish requests through.
    pub control_exchange: String,
    /// Whether topic queues (the ones handlers listen on) survive a broker restart.
    pub durable_topic_queues: bool,
    /// Backoff schedule for (re)connecting.
    pub retry: RetryPolicy,
    /// What happens once the retry budget above is exhausted.
    pub retry_exhausted: RetryExhaustedPolicy,
    /// Number of pooled client connections kept warm for `call`/`cast`/`multicall`.
    pub conn_pool_size: usize,
    /// Number of requests a single dispatcher will process concurrently.
    pub worker_pool_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Amqp,
            broker_host: "localhost".to_string(),
            broker_port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            control_exchange: "warren".to_string(),
            durable_topic_queues: false,
            retry: RetryPolicy::default(),
            retry_exhausted: RetryExhaustedPolicy::Fatal,
            conn_pool_size: 30,
            worker_pool_size: 64,
        }
    }
}

impl TransportConfig {
    /// A configuration pointed at the in-memory broker, handy for tests. Retries are disabled
    /// since the memory broker has nothing to retry against.
    pub fn in_memory() -> Self {
        Self {
            transport: Transport::Memory,
            retry: RetryPolicy {
                max_retries: Some(0),
                ..RetryPolicy::default()
            },
            retry_exhausted: RetryExhaustedPolicy::Surface,
            conn_pool_size: 4,
            worker_pool_size: 8,
            ..Self::default()
        }
    }
}
