use std::sync::Arc;

use crate::{Context, Envelope, Error, HandlerError, ProxyDispatcher, Reply, Transport, TransportConfig};

async fn boom() -> Result<Reply, HandlerError> {
    Err(HandlerError::new("KindX", "nope"))
}

#[tokio::test]
async fn handler_errors_surface_as_remote_errors() {
    let transport = Transport::connect(TransportConfig::in_memory()).await.unwrap();
    let dispatcher = ProxyDispatcher::new((), 4).method("boom", boom);
    let _server = transport.serve_topic("boom-topic", Arc::new(dispatcher));

    let ctx = Context::new();
    let err = transport
        .call(&ctx, "boom-topic", Envelope::for_method("boom"))
        .await
        .unwrap_err();

    match err {
        Error::Remote(remote) => {
            assert_eq!(remote.kind, "KindX");
            assert!(remote.message.contains("nope"));
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn unregistered_method_is_reported_as_unknown() {
    let transport = Transport::connect(TransportConfig::in_memory()).await.unwrap();
    let dispatcher: ProxyDispatcher<()> = ProxyDispatcher::new((), 4);
    let _server = transport.serve_topic("empty-topic", Arc::new(dispatcher));

    let ctx = Context::new();
    let err = transport
        .call(&ctx, "empty-topic", Envelope::for_method("does_not_exist"))
        .await
        .unwrap_err();

    match err {
        Error::Remote(remote) => assert_eq!(remote.kind, "UnknownMethod"),
        other => panic!("expected a remote error, got {other:?}"),
    }
}
