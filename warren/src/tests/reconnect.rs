//! Drives [`crate::connection::Connection`] directly rather than through [`crate::rpc::Transport`]:
//! a forced disconnect only surfaces on the side that is actually blocked waiting on a
//! delivery when it hits, and going through a client `cast` would just exercise the *client's*
//! publish-side reconnect (it opens a fresh channel on its own retry, which incidentally clears
//! the fault before the dispatcher ever sees it). Talking to the consuming connection directly
//! pins the fault to the side this test is actually about.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::broker::{Broker, MemoryBroker};
use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::endpoint::Callback;
use crate::exchange::ExchangeKind;

#[tokio::test]
async fn drain_loop_reconnects_and_resumes_after_a_forced_broker_drop() {
    let broker = MemoryBroker::new();
    let config = Arc::new(TransportConfig::in_memory());
    let dyn_broker: Arc<dyn Broker> = Arc::new(broker.clone());

    let mut conn = Connection::connect(dyn_broker.clone(), config.clone()).await.unwrap();

    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let received_for_cb = received.clone();
    let callback: Callback = Arc::new(move |payload: Vec<u8>| {
        received_for_cb.lock().unwrap().push(payload);
        Ok(())
    });
    conn.create_consumer(ExchangeKind::Topic, "reconnect-topic", callback)
        .await
        .unwrap();

    // The very first poll of a freshly started consumer sees this immediately, so the drain
    // loop hits the fault before it ever has a chance to receive anything.
    broker.force_disconnect();

    let drain_task = tokio::spawn(async move {
        conn.drain_next().await.unwrap();
    });

    // Publish while the drain loop is still inside its one-second reconnect backoff. The
    // message sits buffered in the (already-bound) queue either way, so this also covers the
    // case where a publish lands before the consuming side has resubscribed.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut publisher = Connection::connect(dyn_broker, config).await.unwrap();
    publisher
        .publisher_send(ExchangeKind::Topic, "reconnect-topic", br#"{"method":"ping"}"#)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), drain_task)
        .await
        .expect("drain loop did not recover from the forced disconnect in time")
        .unwrap();

    assert_eq!(received.lock().unwrap().len(), 1);
}
