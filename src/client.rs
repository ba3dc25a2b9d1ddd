//! Minimal mini-kv client.
//!
//! Provides an async connect and methods for issuing the supported commands.

use crate::cmd::{Delete, Get, Set};
use crate::{Connection, ConnectionError};

use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Longest response line the client accepts.
const MAX_RESPONSE_SIZE: usize = 64 * 1024;

/// Prefix the server puts in front of every error response.
const ERROR_PREFIX: &str = "ERROR: ";

/// Established connection with a mini-kv server.
///
/// Backed by a single `TcpStream`, `Client` provides basic network client
/// functionality (no pooling, retrying, ...). Connections are established
/// using the [`connect`](fn@connect) function.
///
/// Requests are issued using the various methods of `Client`. Each one
/// writes one line and waits for the single response line.
pub struct Client {
    /// The TCP connection decorated with the line protocol encoder /
    /// decoder.
    connection: Connection<TcpStream>,
}

/// Failure of a single request.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with `ERROR: <message>`. The connection is still
    /// usable.
    #[error("server error: {0}")]
    Server(String),

    /// The server answered with something the request does not expect.
    #[error("unexpected response '{0}'")]
    Unexpected(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl ClientError {
    /// Returns `true` if the server reported the key as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Server(msg) if msg.ends_with("not found"))
    }

    /// Returns `true` if the connection cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Connection(err) if err.is_fatal())
    }
}

/// Establish a connection with the mini-kv server located at `addr`.
///
/// `addr` may be any type that can be asynchronously converted to a
/// `SocketAddr`. This includes `SocketAddr` and strings. The `ToSocketAddrs`
/// trait is the Tokio version and not the `std` version.
///
/// # Examples
///
/// ```no_run
/// use mini_kv::client;
///
/// #[tokio::main]
/// async fn main() {
///     let client = match client::connect("localhost:3223").await {
///         Ok(client) => client,
///         Err(_) => panic!("failed to establish connection"),
///     };
/// # drop(client);
/// }
/// ```
pub async fn connect<T: ToSocketAddrs>(addr: T) -> crate::Result<Client> {
    // The `addr` argument is passed directly to `TcpStream::connect`. This
    // performs any asynchronous DNS lookup and attempts to establish the TCP
    // connection. An error at either step returns an error, which is then
    // bubbled up to the caller.
    let socket = TcpStream::connect(addr).await?;

    let connection = Connection::new(socket, MAX_RESPONSE_SIZE);

    Ok(Client { connection })
}

impl Client {
    /// Get the value of key.
    ///
    /// A missing key is reported by the server as an error, surfaced as
    /// `ClientError::Server`; see `ClientError::is_not_found`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mini_kv::client;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let mut client = client::connect("localhost:3223").await.unwrap();
    ///
    ///     let val = client.get("foo").await.unwrap();
    ///     println!("Got = {:?}", val);
    /// }
    /// ```
    pub async fn get(&mut self, key: &str) -> Result<String, ClientError> {
        self.execute(&Get::new(key).into_line()).await
    }

    /// Set `key` to hold the given `value`, overwriting any previous value.
    pub async fn set(&mut self, key: &str, value: &str) -> Result<(), ClientError> {
        let response = self.execute(&Set::new(key, value).into_line()).await?;
        expect_ok(response)
    }

    /// Remove `key`. Removing a missing key is a server error.
    pub async fn delete(&mut self, key: &str) -> Result<(), ClientError> {
        let response = self.execute(&Delete::new(key).into_line()).await?;
        expect_ok(response)
    }

    /// Send `line` verbatim and wait for the response line.
    ///
    /// Error responses are returned as `ClientError::Server`; any other
    /// response is returned as is.
    pub async fn execute(&mut self, line: &str) -> Result<String, ClientError> {
        debug!(request = %line);

        self.connection.write_line(line).await?;
        let response = self.connection.read_line().await?;

        debug!(%response);

        match response.strip_prefix(ERROR_PREFIX) {
            Some(msg) => Err(ClientError::Server(msg.to_string())),
            None => Ok(response),
        }
    }
}

fn expect_ok(response: String) -> Result<(), ClientError> {
    match response.as_str() {
        "OK" => Ok(()),
        _ => Err(ClientError::Unexpected(response)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let err = ClientError::Server("key 'a' not found".to_string());
        assert!(err.is_not_found());
        assert!(!err.is_fatal());

        let err = ClientError::Server("unsupported operation 'PING'".to_string());
        assert!(!err.is_not_found());

        assert!(ClientError::Connection(ConnectionError::Closed).is_fatal());
        assert!(!ClientError::Connection(ConnectionError::WriteTimeout).is_fatal());
    }

    #[test]
    fn only_ok_acknowledges() {
        assert!(expect_ok("OK".to_string()).is_ok());
        assert!(matches!(
            expect_ok("value".to_string()),
            Err(ClientError::Unexpected(v)) if v == "value"
        ));
    }
}
