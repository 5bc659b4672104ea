//! Request context: the small bundle of ambient fields (request id, caller identity, ...)
//! that rides alongside every call and is reconstructed on the server side.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

/// Anything that can be flattened into `_context_`-prefixed envelope fields on the way out and
/// rebuilt from them on the way in.
///
/// `call`/`cast`/`multicall`/`fanout_cast` are generic over this trait so callers can carry
/// whatever ambient fields their application needs (tenant id, auth token, trace id, ...).
/// Server-side dispatch always reconstructs into the concrete [`Context`] type below; see
/// `DESIGN.md` for why full pluggability was not extended to the server side.
pub trait RequestContext: Send + Sync + 'static {
    /// Flattens this context into a set of named fields, each of which must be representable
    /// as a JSON value.
    fn to_fields(&self) -> BTreeMap<String, Value>;

    /// Rebuilds a context from the fields a peer sent. Any field absent or malformed should be
    /// treated as its default, not as an error: a context is best-effort ambient metadata, not
    /// load-bearing for dispatch.
    fn from_fields(fields: BTreeMap<String, Value>) -> Self;
}

/// The default request context: a request id and an optional caller identity.
///
/// Mirrors the subset of the original `RpcContext` (itself a thin wrapper over the control
/// plane's request context) that this crate actually threads through the wire: everything
/// else in that original context is reconstructed application-side from the caller identity,
/// not carried on every message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Context {
    /// A unique identifier for the logical request this call is part of. Useful for
    /// correlating logs across services.
    pub request_id: String,
    /// The identity of whoever initiated the call, if known.
    pub caller: Option<String>,
}

impl Context {
    /// A fresh context with a newly generated request id and no caller identity set.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            caller: None,
        }
    }

    /// Attaches a caller identity.
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

impl RequestContext for Context {
    fn to_fields(&self) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("request_id".to_string(), Value::String(self.request_id.clone()));
        if let Some(caller) = &self.caller {
            fields.insert("caller".to_string(), Value::String(caller.clone()));
        }
        fields
    }

    fn from_fields(mut fields: BTreeMap<String, Value>) -> Self {
        let request_id = fields
            .remove("request_id")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let caller = fields.remove("caller").and_then(|v| v.as_str().map(str::to_string));
        Self { request_id, caller }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_round_trips_through_fields() {
        let ctx = Context::new().with_caller("scheduler");
        let rebuilt = Context::from_fields(ctx.to_fields());
        assert_eq!(ctx, rebuilt);
    }

    #[test]
    fn context_from_empty_fields_is_default() {
        let rebuilt = Context::from_fields(BTreeMap::new());
        assert_eq!(rebuilt, Context::default());
    }
}
