//! mini-kv server implementation.
//!
//! Provides an async `run` function that listens for inbound connections,
//! admits as many as the pool allows and spawns a task per admitted
//! connection.

use crate::config::NetworkConfig;
use crate::pool::AdmissionPool;
use crate::session::{Exit, Session};
use crate::{Connection, Shutdown, Storage};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// A bound, not yet running server.
///
/// Binding is split from running so callers can learn the local address
/// (for example after binding port `0`) before serving.
pub struct Server {
    listener: TcpListener,
    config: NetworkConfig,
    storage: Arc<dyn Storage>,
}

/// Errors that stop the server. Per-connection errors never end up here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound. The server never started.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Accepting kept failing after every retry.
    #[error("failed to accept connections: {0}")]
    Accept(#[source] io::Error),

    /// The shutdown future completed. This is the normal way for `run` to
    /// return.
    #[error("server stopped: shutdown requested")]
    Cancelled,
}

impl ServerError {
    /// Returns `true` if the server stopped because shutdown was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServerError::Cancelled)
    }
}

/// Server listener state, created in `Server::run`. It runs the accept
/// loop and initializes per-session state.
struct Listener {
    /// TCP listener supplied by `Server`.
    listener: TcpListener,

    /// Shared storage handle, cloned into every session.
    storage: Arc<dyn Storage>,

    /// Limit the max number of concurrent sessions.
    ///
    /// A token is taken, without waiting, for every accepted connection.
    /// When none is free the connection is closed on the spot. The token
    /// travels with the session task and goes back to the pool when that
    /// task ends.
    pool: AdmissionPool,

    /// Broadcasts a shutdown signal to all active sessions.
    ///
    /// Each session holds a receiver. The signal is delivered by dropping
    /// this sender when the accept loop exits; sessions observe the closed
    /// channel at the top of their next iteration and stop. Sessions are
    /// never awaited.
    notify_shutdown: broadcast::Sender<()>,

    idle_timeout: Duration,
    max_line_size: usize,
}

impl Server {
    /// Binds `config.address`.
    ///
    /// `config` is expected to be validated already.
    pub async fn bind(
        config: NetworkConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Server, ServerError> {
        let listener = TcpListener::bind(&config.address)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.address.clone(),
                source,
            })?;

        Ok(Server {
            listener,
            config,
            storage,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the server until `shutdown` completes or accepting fails for
    /// good.
    ///
    /// `tokio::signal::ctrl_c()` can be used as the `shutdown` argument.
    ///
    /// Returns `ServerError::Cancelled` once `shutdown` completes. The
    /// listener is closed at that point; sessions still running finish on
    /// their own (peer disconnect, idle deadline or their next shutdown
    /// check) and are not waited for.
    pub async fn run(self, shutdown: impl Future) -> Result<(), ServerError> {
        let (notify_shutdown, _) = broadcast::channel(1);

        // The configured address may use port `0`; report the real one.
        let address = self
            .listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.config.address.clone());

        let mut server = Listener {
            pool: AdmissionPool::new(self.config.max_connections),
            listener: self.listener,
            storage: self.storage,
            notify_shutdown,
            idle_timeout: self.config.idle_timeout,
            max_line_size: self.config.max_message_size,
        };

        info!(
            %address,
            max_connections = server.pool.capacity(),
            idle_timeout = ?server.idle_timeout,
            "ready to accept connections"
        );

        // Concurrently run the accept loop and listen for the `shutdown`
        // signal. The branch order matters: with `biased`, a completed
        // shutdown wins over a connection that is ready at the same time.
        let result = tokio::select! {
            biased;

            _ = shutdown => {
                info!("shutting down");
                Err(ServerError::Cancelled)
            }
            res = server.run() => {
                // Errors encountered when handling individual connections do
                // not bubble up to this point.
                if let Err(err) = &res {
                    error!(cause = %err, "failed to accept");
                }
                res
            }
        };

        // Dropping the listener closes it; dropping `notify_shutdown` tells
        // every session to stop at its next iteration.
        let Listener {
            listener,
            notify_shutdown,
            ..
        } = server;
        drop(listener);
        drop(notify_shutdown);

        result
    }
}

/// Bind `config.address` and serve until `shutdown` completes.
///
/// A bind failure is returned as `ServerError::Bind` before anything is
/// served.
pub async fn run(
    config: NetworkConfig,
    storage: Arc<dyn Storage>,
    shutdown: impl Future,
) -> Result<(), ServerError> {
    Server::bind(config, storage).await?.run(shutdown).await
}

impl Listener {
    /// Run the accept loop.
    ///
    /// Listen for inbound connections. For each inbound connection that can
    /// be admitted, spawn a task to process that connection.
    ///
    /// # Errors
    ///
    /// Returns `Err` if accepting returns an error that persists through the
    /// backoff in `accept`. The loop never ends otherwise.
    async fn run(&mut self) -> Result<(), ServerError> {
        loop {
            let (socket, peer) = self.accept().await?;

            // Overload is shed, not queued: without a free token the socket
            // is dropped, which closes it before any byte is exchanged.
            let token = match self.pool.try_acquire() {
                Some(token) => token,
                None => {
                    debug!(%peer, "drop session due to the limit");
                    drop(socket);
                    continue;
                }
            };

            debug!(%peer, available = self.pool.available(), "start session");

            let mut session = Session::new(
                Connection::new(socket, self.max_line_size),
                self.storage.clone(),
                self.idle_timeout,
                Shutdown::new(self.notify_shutdown.subscribe()),
            );

            // Spawn a new task to process the connection. Tokio tasks are
            // like asynchronous green threads and are executed concurrently.
            tokio::spawn(
                async move {
                    let start = Instant::now();
                    let exit = session.run().await;

                    // Close the socket, then give the slot back. A panic in
                    // `run` drops both while unwinding.
                    drop(session);
                    token.release();

                    match exit {
                        Exit::Fatal(err) => {
                            info!(cause = %err, duration = ?start.elapsed(), "session finished")
                        }
                        exit => debug!(?exit, duration = ?start.elapsed(), "session finished"),
                    }
                }
                .instrument(info_span!("session", %peer)),
            );
        }
    }

    /// Accept an inbound connection.
    ///
    /// Errors are handled by backing off and retrying. An exponential
    /// backoff strategy is used. After the first failure, the task waits for
    /// 1 second. After the second failure, the task waits for 2 seconds.
    /// Each subsequent failure doubles the wait time. If accepting fails on
    /// the 6th try after waiting for 64 seconds, then this function returns
    /// with an error.
    async fn accept(&mut self) -> Result<(TcpStream, SocketAddr), ServerError> {
        let mut backoff = 1;

        // Try to accept a few times
        loop {
            // Perform the accept operation. If a socket is successfully
            // accepted, return it. Otherwise, save the error.
            match self.listener.accept().await {
                Ok(accepted) => return Ok(accepted),
                Err(err) => {
                    if backoff > 64 {
                        // Accept has failed too many times. Return the error.
                        return Err(ServerError::Accept(err));
                    }
                    warn!(cause = %err, backoff, "failed to accept connection, retrying");
                }
            }

            // Pause execution until the back off period elapses.
            time::sleep(Duration::from_secs(backoff)).await;

            // Double the back off
            backoff *= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = NetworkConfig {
            address: taken.local_addr().unwrap().to_string(),
            ..NetworkConfig::default()
        };

        let err = run(config, Arc::new(Db::new()), std::future::pending::<()>())
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn completed_shutdown_stops_immediately() {
        let config = NetworkConfig {
            address: "127.0.0.1:0".to_string(),
            ..NetworkConfig::default()
        };

        let err = run(config, Arc::new(Db::new()), async {})
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ready_event_reports_the_bound_address() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let config = NetworkConfig {
            address: "127.0.0.1:0".to_string(),
            ..NetworkConfig::default()
        };
        let server = Server::bind(config, Arc::new(Db::new())).await.unwrap();
        let addr = server.local_addr().unwrap();

        assert!(server.run(async {}).await.unwrap_err().is_cancelled());

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("ready to accept connections"), "{}", logs);
        assert!(logs.contains(&format!("address={}", addr)), "{}", logs);
    }
}
