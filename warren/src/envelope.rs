//! The wire envelope: a JSON object carrying a method name, arguments, and ambient context
//! fields, plus the reply envelope sent back for each result (or the stream terminator).

use derive_more::{Deref, DerefMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::context::RequestContext;
use crate::error::Result;

/// The request envelope's method-name field.
pub const METHOD_KEY: &str = "method";
/// The request envelope's arguments field.
pub const ARGS_KEY: &str = "args";
/// The field a `multicall`/`call` request stashes its reply-queue id in; stripped before the
/// envelope reaches a handler.
pub const MSG_ID_KEY: &str = "_msg_id";
/// Prefix for flattened [`RequestContext`] fields, e.g. `_context_request_id`.
pub const CONTEXT_PREFIX: &str = "_context_";

/// A request envelope: `{"method": ..., "args": {...}, "_context_...": ..., "_msg_id": ...}`.
///
/// A thin, builder-style newtype over a JSON object map.
#[derive(Debug, Clone, Default, Deref, DerefMut)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Starts a new envelope calling the given method.
    pub fn for_method(method: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(METHOD_KEY.to_string(), Value::String(method.into()));
        Self(map)
    }

    /// Sets a single named argument, merging into any arguments already set.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        match self.0.entry(ARGS_KEY.to_string()).or_insert_with(|| Value::Object(Map::new())) {
            Value::Object(args) => {
                args.insert(key.into(), value);
            }
            other => *other = Value::Object(Map::from_iter([(key.into(), value)])),
        }
        self
    }

    /// Replaces the entire arguments object with the serialized form of `args`.
    pub fn with_args(mut self, args: impl Serialize) -> Self {
        self.0.insert(
            ARGS_KEY.to_string(),
            serde_json::to_value(args).unwrap_or(Value::Null),
        );
        self
    }

    pub(crate) fn method_name(&self) -> Option<&str> {
        self.0.get(METHOD_KEY).and_then(Value::as_str)
    }

    pub(crate) fn args_value(&self) -> Value {
        self.0.get(ARGS_KEY).cloned().unwrap_or_else(|| Value::Object(Map::new()))
    }

    pub(crate) fn set_msg_id(&mut self, msg_id: &str) {
        self.0.insert(MSG_ID_KEY.to_string(), Value::String(msg_id.to_string()));
    }

    /// Flattens a [`RequestContext`] into this envelope's `_context_*` fields.
    pub(crate) fn pack_context<C: RequestContext>(&mut self, ctx: &C) {
        for (key, value) in ctx.to_fields() {
            self.0.insert(format!("{CONTEXT_PREFIX}{key}"), value);
        }
    }

    /// Strips the `_msg_id` and `_context_*` fields out of this envelope, returning them.
    /// Whatever remains in `self` is exactly what a handler's `method`/`args` extraction sees.
    pub(crate) fn unpack_context(&mut self) -> (Option<String>, BTreeMap<String, Value>) {
        let context_keys: Vec<String> = self
            .0
            .keys()
            .filter(|key| key.starts_with(CONTEXT_PREFIX))
            .cloned()
            .collect();
        let mut fields = BTreeMap::new();
        for key in context_keys {
            if let Some(value) = self.0.remove(&key) {
                fields.insert(key[CONTEXT_PREFIX.len()..].to_string(), value);
            }
        }
        let msg_id = self.0.remove(MSG_ID_KEY).and_then(|v| v.as_str().map(str::to_string));
        (msg_id, fields)
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The reply envelope sent for each item of a (possibly streamed) result, and, with both
/// fields `null`, as the terminator that ends a `multicall`.
///
/// A `null` `result` with no `failure` is ambiguous with the terminator by construction: a
/// handler that genuinely wants to reply with `null` looks, on the wire, exactly like the end
/// of the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReplyEnvelope {
    pub(crate) result: Value,
    pub(crate) failure: Option<(String, String, Vec<String>)>,
}

impl ReplyEnvelope {
    pub(crate) fn terminator() -> Self {
        Self {
            result: Value::Null,
            failure: None,
        }
    }

    pub(crate) fn is_terminator(&self) -> bool {
        self.result.is_null() && self.failure.is_none()
    }
}
