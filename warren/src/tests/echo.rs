use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{Args, Context, Envelope, HandlerError, ProxyDispatcher, Reply, State, Transport, TransportConfig};

use super::{wait_until, Recorder};

#[derive(Deserialize)]
struct EchoArgs {
    value: Value,
}

async fn echo(State(state): State<Recorder>, Args(args): Args<EchoArgs>) -> Result<Reply, HandlerError> {
    state.record(args.value.clone());
    Ok(Reply::from(args.value))
}

#[tokio::test]
async fn cast_invokes_the_handler_once_with_no_reply_consulted() {
    let transport = Transport::connect(TransportConfig::in_memory()).await.unwrap();
    let recorder = Recorder::default();
    let dispatcher = ProxyDispatcher::new(recorder.clone(), 4).method("echo", echo);
    let _server = transport.serve_topic("echo-cast", Arc::new(dispatcher));

    let ctx = Context::new();
    transport
        .cast(&ctx, "echo-cast", Envelope::for_method("echo").with_arg("value", 42))
        .await
        .unwrap();

    wait_until(|| recorder.count() == 1).await;
    assert_eq!(recorder.values(), vec![json!(42)]);
}

#[tokio::test]
async fn call_returns_the_echoed_value() {
    let transport = Transport::connect(TransportConfig::in_memory()).await.unwrap();
    let recorder = Recorder::default();
    let dispatcher = ProxyDispatcher::new(recorder, 4).method("echo", echo);
    let _server = transport.serve_topic("echo-call", Arc::new(dispatcher));

    let ctx = Context::new().with_caller("scheduler");
    let reply = transport
        .call(&ctx, "echo-call", Envelope::for_method("echo").with_arg("value", 42))
        .await
        .unwrap();

    assert_eq!(reply, json!(42));
}
