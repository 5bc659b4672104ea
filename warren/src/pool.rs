//! Connection pooling: a LIFO stack of idle connections guarded by a semaphore, and a scoped
//! handle that returns its connection to the pool on explicit release or, failing that, on
//! drop. Mirrors `impl_kombu.Pool`/`ConnectionContext`, with the runtime
//! `InvalidRPCConnectionReuse` error replaced by compile-time prevention: [`PooledConnection`]
//! is consumed by [`PooledConnection::release`], so using it afterwards is a type error, not a
//! runtime one.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::broker::Broker;
use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::error::Result;

pub(crate) struct Pool {
    broker: Arc<dyn Broker>,
    config: Arc<TransportConfig>,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
}

impl Pool {
    pub(crate) fn new(broker: Arc<dyn Broker>, config: Arc<TransportConfig>) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(config.conn_pool_size.max(1)));
        Arc::new(Self {
            broker,
            config,
            idle: Mutex::new(Vec::new()),
            permits,
        })
    }

    /// Acquires a connection from the pool, opening a new one if none are idle. Blocks until a
    /// permit is available once `conn_pool_size` connections are checked out.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");
        let existing = self.idle.lock().await.pop();
        let conn = match existing {
            Some(conn) => conn,
            None => Connection::connect(self.broker.clone(), self.config.clone()).await?,
        };
        Ok(PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
            permit: Some(permit),
        })
    }

    /// Opens a dedicated connection outside the pool, for long-lived server-side dispatch
    /// loops that should not compete with `call`/`cast`/`multicall` for pooled connections.
    pub(crate) async fn open_dedicated(&self) -> Result<Connection> {
        Connection::connect(self.broker.clone(), self.config.clone()).await
    }

    /// The broker backing this pool's connections, for test code that needs to reach a
    /// [`crate::broker::MemoryBroker`]'s fault-injection hooks.
    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    async fn put_back(&self, mut conn: Connection) {
        if let Err(e) = conn.reset().await {
            tracing::warn!("failed to reset connection before returning it to the pool, dropping it instead: {e:#}");
            return;
        }
        self.idle.lock().await.push(conn);
    }

    /// Acquires a connection, runs `f` against it, and releases it back to the pool on every
    /// exit path, including `f` returning an error. This is the general-purpose scoped
    /// acquisition helper `call`/`cast`/`multicall`/the reply path all build on.
    pub(crate) async fn with_connection<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Connection) -> BoxFuture<'c, Result<T>>,
    {
        let mut pooled = self.acquire().await?;
        let result = f(&mut pooled).await;
        pooled.release().await;
        result
    }
}

/// A connection checked out of a [`Pool`]. Derefs to [`Connection`] for the duration of its
/// scope; call [`PooledConnection::release`] to return it promptly, or simply let it drop (a
/// background task performs the same release asynchronously, since `Drop` cannot itself be
/// async).
pub(crate) struct PooledConnection {
    pool: Arc<Pool>,
    conn: Option<Connection>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    /// Returns this connection to its pool. Consuming `self` makes using it afterwards a
    /// compile error rather than a runtime one.
    pub(crate) async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn).await;
        }
        self.permit.take();
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken by release/drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken by release/drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let permit = self.permit.take();
            tokio::spawn(async move {
                pool.put_back(conn).await;
                drop(permit);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::error::Error;

    #[tokio::test]
    async fn with_connection_releases_on_error_rather_than_leaking_the_checkout() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let config = Arc::new(TransportConfig::in_memory());
        let pool = Pool::new(broker, config);

        let result = pool
            .with_connection(|_conn| -> BoxFuture<'_, Result<()>> { Box::pin(async { Err(Error::ConsumerCancelled) }) })
            .await;
        assert!(result.is_err());

        assert_eq!(pool.idle.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn acquire_reuses_an_idle_connection_instead_of_opening_a_new_one() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let config = Arc::new(TransportConfig::in_memory());
        let pool = Pool::new(broker, config);

        pool.with_connection(|_conn| -> BoxFuture<'_, Result<()>> { Box::pin(async { Ok(()) }) })
            .await
            .unwrap();
        assert_eq!(pool.idle.lock().await.len(), 1);

        let pooled = pool.acquire().await.unwrap();
        assert_eq!(pool.idle.lock().await.len(), 0, "the only idle connection was handed out, not duplicated");
        pooled.release().await;
        assert_eq!(pool.idle.lock().await.len(), 1);
    }
}
