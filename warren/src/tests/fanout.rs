use std::sync::Arc;

use serde_json::Value;

use crate::{Context, Envelope, HandlerError, ProxyDispatcher, Reply, State, Transport, TransportConfig};

use super::{wait_until, Recorder};

async fn ping(State(state): State<Recorder>) -> Result<Reply, HandlerError> {
    state.record(Value::Null);
    Ok(Reply::from(Value::Null))
}

#[tokio::test]
async fn fanout_cast_invokes_every_bound_server_exactly_once() {
    let transport = Transport::connect(TransportConfig::in_memory()).await.unwrap();

    let recorder_a = Recorder::default();
    let recorder_b = Recorder::default();
    let dispatcher_a = ProxyDispatcher::new(recorder_a.clone(), 4).method("ping", ping);
    let dispatcher_b = ProxyDispatcher::new(recorder_b.clone(), 4).method("ping", ping);
    let _server_a = transport.serve_fanout("broadcast-topic", Arc::new(dispatcher_a));
    let _server_b = transport.serve_fanout("broadcast-topic", Arc::new(dispatcher_b));

    // Give both dispatch loops a chance to declare and bind their queues before the broadcast
    // goes out; fanout delivery only reaches bindings that already exist at publish time.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let ctx = Context::new();
    transport
        .fanout_cast(&ctx, "broadcast-topic", Envelope::for_method("ping"))
        .await
        .unwrap();

    wait_until(|| recorder_a.count() == 1 && recorder_b.count() == 1).await;
}
