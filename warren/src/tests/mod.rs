//! End-to-end coverage of the transport's public verbs against the in-memory broker: cast,
//! call, multicall streaming, handler failures, fanout broadcast, and recovery from a simulated
//! broker drop. Every test here drives a real [`crate::rpc::Transport`] and
//! [`crate::dispatcher::ProxyDispatcher`] pair rather than poking at internals, except
//! `reconnect`, which also exercises [`crate::connection::Connection`] directly.

use std::sync::{Arc, Mutex};

use serde_json::Value;

mod echo;
mod failure;
mod fanout;
mod reconnect;
mod stream;

/// Records every value a test handler was invoked with, so casts (which have no reply) can
/// still be asserted against.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Value>>>);

impl Recorder {
    fn record(&self, value: Value) {
        self.0.lock().unwrap().push(value);
    }

    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn values(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }
}

impl<'a> From<&'a Recorder> for Recorder {
    fn from(recorder: &'a Recorder) -> Self {
        recorder.clone()
    }
}

/// Polls `predicate` until it's true, for asserting on state a handler sets asynchronously
/// (namely after a `cast`, which returns as soon as the broker accepts the message, not once a
/// handler has run).
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition was never satisfied within the timeout");
}
