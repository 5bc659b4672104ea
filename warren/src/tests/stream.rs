use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::{Args, Context, Envelope, HandlerError, ProxyDispatcher, Reply, Transport, TransportConfig};

#[derive(Deserialize)]
struct StreamArgs {
    n: u64,
}

async fn stream(Args(args): Args<StreamArgs>) -> Result<Reply, HandlerError> {
    Ok(Reply::stream(1..=args.n))
}

#[tokio::test]
async fn multicall_streams_every_value_then_terminates() {
    let transport = Transport::connect(TransportConfig::in_memory()).await.unwrap();
    let dispatcher = ProxyDispatcher::new((), 4).method("stream", stream);
    let _server = transport.serve_topic("stream-topic", Arc::new(dispatcher));

    let ctx = Context::new();
    let mut waiter = transport
        .multicall(&ctx, "stream-topic", Envelope::for_method("stream").with_arg("n", 3))
        .await
        .unwrap();

    let mut items = Vec::new();
    while let Some(item) = waiter.next().await {
        items.push(item.unwrap());
    }
    assert_eq!(items, vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn call_against_a_streaming_handler_returns_its_last_value() {
    let transport = Transport::connect(TransportConfig::in_memory()).await.unwrap();
    let dispatcher = ProxyDispatcher::new((), 4).method("stream", stream);
    let _server = transport.serve_topic("stream-call-topic", Arc::new(dispatcher));

    let ctx = Context::new();
    let reply = transport
        .call(&ctx, "stream-call-topic", Envelope::for_method("stream").with_arg("n", 3))
        .await
        .unwrap();

    assert_eq!(reply, json!(3));
}
