//! Exchange kinds and the endpoint options derived from them.

use uuid::Uuid;

use crate::config::TransportConfig;

/// The three AMQP exchange shapes this crate's RPC verbs are built on.
///
/// This mirrors the direct/topic/fanout trio the original system's `DirectQueue`,
/// `TopicQueue`, and `FanoutQueue` classes wrap, rather than exposing the full generality of
/// AMQP exchange types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Point-to-point: exactly one recipient, addressed by a server-generated id (used for
    /// reply queues).
    Direct,
    /// Load-balanced: one of potentially many bound queues receives each message, chosen by
    /// exact routing-key match. Used for `call`/`cast`/handler dispatch.
    Topic,
    /// Broadcast: every bound queue receives every message. Used for `fanout_cast`.
    Fanout,
}

/// Resolved parameters for declaring/binding an exchange and (optionally) a queue, derived
/// from an [`ExchangeKind`] and a topic or message id.
#[derive(Debug, Clone)]
pub(crate) struct EndpointOptions {
    pub(crate) exchange_name: String,
    pub(crate) exchange_kind: ExchangeKind,
    pub(crate) queue_name: Option<String>,
    pub(crate) routing_key: String,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) exclusive: bool,
}

impl EndpointOptions {
    /// Builds the options a consumer or publisher of `kind` needs to talk about `topic_or_id`.
    ///
    /// For [`ExchangeKind::Direct`] this is a message id; for [`ExchangeKind::Topic`] and
    /// [`ExchangeKind::Fanout`] it is the RPC topic name.
    pub(crate) fn for_kind(kind: ExchangeKind, config: &TransportConfig, topic_or_id: &str) -> Self {
        match kind {
            ExchangeKind::Direct => Self {
                exchange_name: topic_or_id.to_string(),
                exchange_kind: ExchangeKind::Direct,
                queue_name: Some(topic_or_id.to_string()),
                routing_key: topic_or_id.to_string(),
                durable: false,
                auto_delete: true,
                exclusive: true,
            },
            ExchangeKind::Topic => Self {
                exchange_name: config.control_exchange.clone(),
                exchange_kind: ExchangeKind::Topic,
                queue_name: Some(topic_or_id.to_string()),
                routing_key: topic_or_id.to_string(),
                durable: config.durable_topic_queues,
                auto_delete: false,
                exclusive: false,
            },
            ExchangeKind::Fanout => {
                let nonce = Uuid::new_v4().simple().to_string();
                Self {
                    exchange_name: format!("{topic_or_id}_fanout"),
                    exchange_kind: ExchangeKind::Fanout,
                    queue_name: Some(format!("{topic_or_id}_fanout_{nonce}")),
                    routing_key: topic_or_id.to_string(),
                    durable: false,
                    auto_delete: true,
                    exclusive: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_defaults() {
        let config = TransportConfig::default();
        let opts = EndpointOptions::for_kind(ExchangeKind::Direct, &config, "some-msg-id");
        assert_eq!(opts.exchange_name, "some-msg-id");
        assert_eq!(opts.queue_name.as_deref(), Some("some-msg-id"));
        assert_eq!(opts.routing_key, "some-msg-id");
        assert!(!opts.durable);
        assert!(opts.auto_delete);
        assert!(opts.exclusive);
    }

    #[test]
    fn topic_defaults_follow_the_configured_control_exchange_and_durability() {
        let mut config = TransportConfig::default();
        config.control_exchange = "ctl".to_string();
        config.durable_topic_queues = true;
        let opts = EndpointOptions::for_kind(ExchangeKind::Topic, &config, "my-topic");
        assert_eq!(opts.exchange_name, "ctl");
        assert_eq!(opts.queue_name.as_deref(), Some("my-topic"));
        assert_eq!(opts.routing_key, "my-topic");
        assert!(opts.durable);
        assert!(!opts.auto_delete);
        assert!(!opts.exclusive);
    }

    #[test]
    fn fanout_defaults_and_unique_queue_names_per_consumer() {
        let config = TransportConfig::default();
        let a = EndpointOptions::for_kind(ExchangeKind::Fanout, &config, "broadcast");
        let b = EndpointOptions::for_kind(ExchangeKind::Fanout, &config, "broadcast");
        assert_eq!(a.exchange_name, "broadcast_fanout");
        assert_eq!(a.routing_key, "broadcast");
        assert!(!a.durable);
        assert!(a.auto_delete);
        assert!(a.exclusive);
        assert_ne!(a.queue_name, b.queue_name, "each fanout consumer gets its own nonce-suffixed queue");
    }
}
