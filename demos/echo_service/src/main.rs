//! Minimal example wiring a [`warren::ProxyDispatcher`] up to a topic and driving it with the
//! client-side RPC verbs, all over the in-memory broker so the example runs with no AMQP
//! broker on hand.

use serde::Deserialize;
use serde_json::Value;

use warren::{Args, Context, Envelope, HandlerError, ProxyDispatcher, Reply, Transport, TransportConfig};

async fn echo(Args(value): Args<Value>) -> Result<Reply, HandlerError> {
    Ok(Reply::from(value))
}

#[derive(Deserialize)]
struct StreamArgs {
    n: u64,
}

async fn stream(Args(args): Args<StreamArgs>) -> Result<Reply, HandlerError> {
    Ok(Reply::stream(1..=args.n))
}

async fn boom() -> Result<Reply, HandlerError> {
    Err(HandlerError::new("KindX", "nope"))
}

#[tokio::main]
async fn main() -> warren::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let transport = Transport::connect(TransportConfig::in_memory()).await?;

    let dispatcher = ProxyDispatcher::new((), 8)
        .method("echo", echo)
        .method("stream", stream)
        .method("boom", boom);
    let _server = transport.serve_topic("demo", std::sync::Arc::new(dispatcher));

    let ctx = Context::new().with_caller("echo_service example");

    let reply = transport
        .call(&ctx, "demo", Envelope::for_method("echo").with_arg("value", 42))
        .await?;
    println!("echo replied: {reply}");

    let mut stream = transport
        .multicall(&ctx, "demo", Envelope::for_method("stream").with_arg("n", 3))
        .await?;
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item?);
    }
    println!("stream replied: {items:?}");

    match transport.call(&ctx, "demo", Envelope::for_method("boom")).await {
        Ok(value) => println!("boom unexpectedly succeeded: {value}"),
        Err(e) => println!("boom failed as expected: {e}"),
    }

    Ok(())
}
