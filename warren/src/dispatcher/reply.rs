//! What a handler hands back to the dispatcher.

use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

/// A handler's result: either one value, or a lazily-produced sequence of values sent as
/// successive replies before the `multicall` terminator.
///
/// Single-vs-streamed is an explicit, typed choice here rather than something inferred at
/// runtime from the shape of the handler's return value.
pub enum Reply {
    /// A single reply value.
    Single(Value),
    /// A sequence of reply values, each sent as its own `multicall` item.
    Stream(BoxStream<'static, Value>),
}

impl Reply {
    /// Builds a [`Reply::Stream`] from any `IntoIterator` of serializable items.
    pub fn stream<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Serialize,
    {
        Reply::Stream(Box::pin(futures::stream::iter(
            items.into_iter().map(|item| serde_json::to_value(item).unwrap_or(Value::Null)),
        )))
    }
}

impl<T: Serialize> From<T> for Reply {
    fn from(value: T) -> Self {
        Reply::Single(serde_json::to_value(value).unwrap_or(Value::Null))
    }
}
