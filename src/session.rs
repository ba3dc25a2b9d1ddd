use crate::{Command, Connection, ConnectionError, Shutdown, Storage};

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-connection handler. Reads lines from `connection`, applies the
/// commands they hold to `storage` and writes one response line for each.
///
/// A session is owned by the task running it and shares nothing with other
/// sessions except the storage.
pub(crate) struct Session<S> {
    /// Line framed stream to the client.
    connection: Connection<S>,

    /// Shared storage handle. Commands received on `connection` are applied
    /// here.
    storage: Arc<dyn Storage>,

    /// Budget for waiting on the next line, and for writing each response.
    idle_timeout: Duration,

    /// Checked before every line; never interrupts a pending read.
    shutdown: Shutdown,
}

/// Why a session ended.
#[derive(Debug)]
pub(crate) enum Exit {
    /// The shutdown signal was observed between two commands.
    Shutdown,

    /// The peer closed its side of the connection.
    PeerClosed,

    /// An I/O error made the connection unusable: idle deadline, reset,
    /// broken pipe or an oversized line.
    Fatal(ConnectionError),
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        connection: Connection<S>,
        storage: Arc<dyn Storage>,
        idle_timeout: Duration,
        shutdown: Shutdown,
    ) -> Session<S> {
        Session {
            connection,
            storage,
            idle_timeout,
            shutdown,
        }
    }

    /// Process the connection until the peer leaves, a fatal error occurs
    /// or shutdown is signalled.
    ///
    /// Commands are executed strictly in the order they are received; there
    /// is no pipelining.
    ///
    /// Bad commands, lines that are not UTF-8 and storage errors are
    /// answered with `ERROR: <message>` and the loop carries on. Transient
    /// I/O errors are logged and the next line is attempted without
    /// responding.
    pub(crate) async fn run(&mut self) -> Exit {
        loop {
            if self.shutdown.is_shutdown() {
                return Exit::Shutdown;
            }

            // The peer has `idle_timeout` to deliver the next line.
            self.connection
                .set_read_deadline(Instant::now() + self.idle_timeout);

            let response = match self.connection.read_line().await {
                Ok(line) => respond(&line, &*self.storage).await,
                // The line has been consumed. It is answered like any other
                // malformed line so responses stay paired with requests.
                Err(err @ ConnectionError::InvalidUtf8) => {
                    debug!(cause = %err, "decode command");
                    error_response(&err)
                }
                Err(err) => match classify(err, "read command") {
                    Some(exit) => return exit,
                    None => continue,
                },
            };

            if let Err(err) = self.write_line(&response).await {
                if let Some(exit) = classify(err, "write response") {
                    return exit;
                }
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        self.connection
            .set_write_deadline(Instant::now() + self.idle_timeout);
        self.connection.write_line(line).await
    }
}

/// Parse and apply one line, returning the response line.
///
/// Never fails: parse and storage errors become `ERROR: <message>`.
pub(crate) async fn respond(line: &str, storage: &dyn Storage) -> String {
    let cmd = match Command::from_line(line) {
        Ok(cmd) => cmd,
        Err(err) => {
            debug!(cause = %err, "parse command");
            return error_response(&err);
        }
    };

    debug!(cmd = cmd.name(), key = cmd.key(), "execute");

    match cmd.apply(storage).await {
        Ok(Some(value)) => value,
        Ok(None) => "OK".to_string(),
        Err(err) => error_response(&err),
    }
}

pub(crate) fn error_response(err: &dyn std::fmt::Display) -> String {
    format!("ERROR: {}", err)
}

/// Decides whether `err` ends the session.
fn classify(err: ConnectionError, during: &'static str) -> Option<Exit> {
    if !err.is_fatal() {
        warn!(cause = %err, during, "connection error, continuing");
        return None;
    }

    match err {
        ConnectionError::Closed => Some(Exit::PeerClosed),
        err => {
            debug!(cause = %err, during, "fatal connection error");
            Some(Exit::Fatal(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Db, StorageError};

    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadBuf};
    use tokio::sync::broadcast;

    const IDLE: Duration = Duration::from_secs(60);

    fn new_session<S>(stream: S, storage: Arc<dyn Storage>) -> (Session<S>, broadcast::Sender<()>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (tx, rx) = broadcast::channel(1);
        let session = Session::new(
            Connection::new(stream, 1024),
            storage,
            IDLE,
            Shutdown::new(rx),
        );
        (session, tx)
    }

    fn pipe() -> (Connection<DuplexStream>, Session<DuplexStream>, broadcast::Sender<()>) {
        let (client, server) = duplex(1024);
        let (session, tx) = new_session(server, Arc::new(Db::new()));
        (Connection::new(client, 1024), session, tx)
    }

    async fn request(client: &mut Connection<DuplexStream>, line: &str) -> String {
        client.write_line(line).await.unwrap();
        client.read_line().await.unwrap()
    }

    #[tokio::test]
    async fn executes_commands_in_order() {
        let (mut client, mut session, _tx) = pipe();
        let task = tokio::spawn(async move { session.run().await });

        assert_eq!(request(&mut client, "SET a 1").await, "OK");
        assert_eq!(request(&mut client, "GET a").await, "1");
        assert_eq!(request(&mut client, "DELETE a").await, "OK");
        assert_eq!(request(&mut client, "GET a").await, "ERROR: key 'a' not found");
        assert_eq!(request(&mut client, "DELETE a").await, "ERROR: key 'a' not found");

        drop(client);
        assert!(matches!(task.await.unwrap(), Exit::PeerClosed));
    }

    #[tokio::test]
    async fn malformed_line_keeps_connection() {
        let (mut client, mut session, _tx) = pipe();
        let task = tokio::spawn(async move { session.run().await });

        assert_eq!(
            request(&mut client, "bogus").await,
            "ERROR: unsupported operation 'bogus'"
        );
        assert_eq!(request(&mut client, "SET k v").await, "OK");
        assert_eq!(request(&mut client, "GET k").await, "v");

        drop(client);
        assert!(matches!(task.await.unwrap(), Exit::PeerClosed));
    }

    #[tokio::test]
    async fn cancelled_before_first_line() {
        let (mut client, mut session, tx) = pipe();
        tx.send(()).unwrap();

        assert!(matches!(session.run().await, Exit::Shutdown));
        drop(session);

        // Nothing was written before the stream closed.
        assert!(matches!(client.read_line().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn shutdown_does_not_interrupt_pending_read() {
        let (mut client, mut session, tx) = pipe();
        let task = tokio::spawn(async move { session.run().await });

        assert_eq!(request(&mut client, "SET a 1").await, "OK");

        // The session is already waiting for the next line; it answers it
        // and only then notices the signal.
        tx.send(()).unwrap();
        assert_eq!(request(&mut client, "GET a").await, "1");

        assert!(matches!(task.await.unwrap(), Exit::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_peer_is_disconnected() {
        let (_client, mut session, _tx) = pipe();
        let start = Instant::now();

        let exit = session.run().await;

        assert!(matches!(exit, Exit::Fatal(ConnectionError::ReadTimeout)));
        assert!(start.elapsed() >= IDLE);
    }

    #[tokio::test]
    async fn oversized_line_is_fatal() {
        let (client, server) = duplex(4096);
        let (mut session, _tx) = new_session(server, Arc::new(Db::new()));
        let mut client = client;

        let line = format!("SET k {}\n", "x".repeat(2048));
        client.write_all(line.as_bytes()).await.unwrap();

        assert!(matches!(
            session.run().await,
            Exit::Fatal(ConnectionError::LineTooLong { limit: 1024 })
        ));
    }

    struct Broken;

    #[async_trait]
    impl Storage for Broken {
        async fn set(&self, _key: String, _value: String) -> Result<(), StorageError> {
            Err(StorageError::Internal("disk on fire".into()))
        }

        async fn get(&self, _key: &str) -> Result<String, StorageError> {
            Err(StorageError::Internal("disk on fire".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Internal("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn storage_errors_are_reported() {
        let (client, server) = duplex(1024);
        let (mut session, _tx) = new_session(server, Arc::new(Broken));
        let mut client = Connection::new(client, 1024);
        let task = tokio::spawn(async move { session.run().await });

        assert_eq!(
            request(&mut client, "SET k v").await,
            "ERROR: storage failure: disk on fire"
        );
        assert_eq!(
            request(&mut client, "GET k").await,
            "ERROR: storage failure: disk on fire"
        );

        drop(client);
        assert!(matches!(task.await.unwrap(), Exit::PeerClosed));
    }

    /// Stream replaying a fixed script of reads and recording writes. Reads
    /// report end of stream once the script is exhausted.
    #[derive(Default)]
    struct Scripted {
        reads: VecDeque<io::Result<Vec<u8>>>,
        write_error: Option<io::ErrorKind>,
        written: Arc<Mutex<Vec<u8>>>,

        // Once the script is exhausted, reads never complete instead of
        // reporting end of stream.
        silent_after_script: bool,

        // Writes never complete: the peer stopped reading.
        stalled_writes: bool,
    }

    impl Scripted {
        fn read(mut self, data: &str) -> Scripted {
            self.reads.push_back(Ok(data.as_bytes().to_vec()));
            self
        }

        fn read_raw(mut self, data: &[u8]) -> Scripted {
            self.reads.push_back(Ok(data.to_vec()));
            self
        }

        fn read_error(mut self, kind: io::ErrorKind) -> Scripted {
            self.reads.push_back(Err(kind.into()));
            self
        }

        fn write_error(mut self, kind: io::ErrorKind) -> Scripted {
            self.write_error = Some(kind);
            self
        }

        fn then_silent(mut self) -> Scripted {
            self.silent_after_script = true;
            self
        }

        fn stall_writes(mut self) -> Scripted {
            self.stalled_writes = true;
            self
        }
    }

    impl AsyncRead for Scripted {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                Some(Err(err)) => Poll::Ready(Err(err)),
                // Woken by the read deadline.
                None if self.silent_after_script => Poll::Pending,
                None => Poll::Ready(Ok(())),
            }
        }
    }

    impl AsyncWrite for Scripted {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.stalled_writes {
                return Poll::Pending;
            }
            if let Some(kind) = self.write_error {
                return Poll::Ready(Err(kind.into()));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn run_script(stream: Scripted) -> (Exit, String) {
        let written = stream.written.clone();
        let (mut session, _tx) = new_session(stream, Arc::new(Db::new()));
        let exit = session.run().await;
        let written = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        (exit, written)
    }

    #[tokio::test]
    async fn transient_read_error_is_skipped() {
        let stream = Scripted::default()
            .read_error(io::ErrorKind::Other)
            .read_raw(b"GET \xff\n")
            .read("SET k v\nGET k\n");

        let (exit, written) = run_script(stream).await;

        assert!(matches!(exit, Exit::PeerClosed));
        assert_eq!(written, "ERROR: line is not valid UTF-8\nOK\nv\n");
    }

    #[tokio::test]
    async fn invalid_utf8_gets_a_response() {
        let (client, server) = duplex(1024);
        let (mut session, _tx) = new_session(server, Arc::new(Db::new()));
        let task = tokio::spawn(async move { session.run().await });

        let mut client = client;
        client.write_all(b"GET \xff\nSET a 1\n").await.unwrap();

        let mut client = Connection::new(client, 1024);
        assert_eq!(
            client.read_line().await.unwrap(),
            "ERROR: line is not valid UTF-8"
        );
        assert_eq!(client.read_line().await.unwrap(), "OK");

        drop(client);
        assert!(matches!(task.await.unwrap(), Exit::PeerClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn peer_that_stops_reading_is_dropped() {
        let stream = Scripted::default()
            .read("GET k\n")
            .then_silent()
            .stall_writes();
        let start = Instant::now();

        let (exit, written) = run_script(stream).await;

        // The response times out without ending the session; the next read
        // deadline does.
        assert!(matches!(exit, Exit::Fatal(ConnectionError::ReadTimeout)));
        assert!(start.elapsed() >= IDLE * 2);
        assert!(start.elapsed() < IDLE * 3);
        assert_eq!(written, "");
    }

    #[tokio::test]
    async fn reset_ends_session() {
        let stream = Scripted::default()
            .read("SET k v\n")
            .read_error(io::ErrorKind::ConnectionReset)
            .read("GET k\n");

        let (exit, written) = run_script(stream).await;

        assert!(matches!(exit, Exit::Fatal(ConnectionError::Io(_))));
        assert_eq!(written, "OK\n");
    }

    #[tokio::test]
    async fn broken_pipe_on_write_ends_session() {
        let stream = Scripted::default()
            .read("GET k\nGET k\n")
            .write_error(io::ErrorKind::BrokenPipe);

        let (exit, _) = run_script(stream).await;

        match exit {
            Exit::Fatal(ConnectionError::Io(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("unexpected exit {:?}", other),
        }
    }

    #[tokio::test]
    async fn transient_write_error_is_skipped() {
        let stream = Scripted::default()
            .read("GET k\nSET k v\n")
            .write_error(io::ErrorKind::Other);

        let (exit, _) = run_script(stream).await;

        // Both responses fail to write; the session only ends at end of
        // stream.
        assert!(matches!(exit, Exit::PeerClosed));
    }

    /// Collects formatted events in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_go_to_the_local_subscriber() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let stream = Scripted::default()
            .read_error(io::ErrorKind::Other)
            .read("bogus\n");

        let (exit, written) = run_script(stream).await;
        assert!(matches!(exit, Exit::PeerClosed));
        assert_eq!(written, "ERROR: unsupported operation 'bogus'\n");

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("WARN"), "{}", logs);
        assert!(logs.contains("connection error, continuing"), "{}", logs);
        assert!(logs.contains("parse command"), "{}", logs);
    }
}
