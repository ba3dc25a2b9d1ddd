use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::{self, Instant};

/// Send and receive lines from a remote peer.
///
/// The protocol is line oriented: every request and every response is a
/// UTF-8 string terminated by `\n`. `Connection` reads bytes into an
/// internal buffer until a full line is available and hands it to the
/// caller without its terminator.
///
/// Every read and write is bounded by a deadline armed beforehand with
/// `set_read_deadline` / `set_write_deadline`. A blocked operation is never
/// cancelled any other way, so the deadline is the upper bound on how long
/// a silent peer can hold the connection.
///
/// `Connection` works over any byte stream. The server uses `TcpStream`;
/// tests use in-memory pipes.
#[derive(Debug)]
pub struct Connection<S> {
    // The stream is decorated with a `BufWriter`, which provides write
    // level buffering. Reads pass straight through to the inner stream.
    stream: BufWriter<S>,

    // The buffer for reading lines.
    buffer: BytesMut,

    // Longest accepted line, terminator excluded.
    max_line_size: usize,

    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

/// Failure of a single read or write.
///
/// `is_fatal` tells whether the failure means the peer is gone (or too slow)
/// and the session must end, or whether the next line may still succeed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// No complete line arrived before the read deadline.
    #[error("read deadline exceeded")]
    ReadTimeout,

    /// The response could not be written before the write deadline.
    #[error("write deadline exceeded")]
    WriteTimeout,

    /// A line grew past the configured maximum without a terminator.
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The line is not valid UTF-8. The offending bytes are discarded.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Returns `true` if the connection cannot be used any more.
    ///
    /// Stream end, broken pipe, reset and an exceeded read deadline are
    /// fatal. So is an oversized line: the stream cannot be resynchronized
    /// without reading the rest of it. Anything else is logged by the caller
    /// and the next line is attempted.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConnectionError::Closed
            | ConnectionError::ReadTimeout
            | ConnectionError::LineTooLong { .. } => true,
            ConnectionError::WriteTimeout | ConnectionError::InvalidUtf8 => false,
            ConnectionError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
            ),
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new `Connection`, backed by `stream`. Lines longer than
    /// `max_line_size` bytes are rejected.
    pub fn new(stream: S, max_line_size: usize) -> Connection<S> {
        Connection {
            stream: BufWriter::new(stream),
            // Default to a 4KB read buffer, or less for small limits. The
            // buffer grows as needed up to the line limit.
            buffer: BytesMut::with_capacity(max_line_size.min(4 * 1024) + 1),
            max_line_size,
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Bound the next reads by `deadline`.
    pub fn set_read_deadline(&mut self, deadline: Instant) {
        self.read_deadline = Some(deadline);
    }

    /// Bound the next writes by `deadline`.
    pub fn set_write_deadline(&mut self, deadline: Instant) {
        self.write_deadline = Some(deadline);
    }

    /// Read a single line from the underlying stream.
    ///
    /// The function waits until it has retrieved enough data to return a
    /// full line. Data remaining in the read buffer after the line has been
    /// parsed is kept there for the next call to `read_line`.
    ///
    /// # Returns
    ///
    /// On success, the line without its `\n` (or `\r\n`) terminator. If the
    /// peer closes the stream in the middle of a line, the partial line is
    /// returned and the following call reports `Closed`.
    pub async fn read_line(&mut self) -> Result<String, ConnectionError> {
        loop {
            // Attempt to parse a line from the buffered data. If enough data
            // has been buffered, the line is returned.
            if let Some(line) = self.parse_line()? {
                return Ok(line);
            }

            // There is not enough buffered data to read a line. Attempt to
            // read more data from the socket.
            //
            // On success, the number of bytes is returned. `0` indicates
            // "end of stream".
            let deadline = self.read_deadline;
            let read = self.stream.read_buf(&mut self.buffer);
            let n = match deadline {
                Some(deadline) => time::timeout_at(deadline, read)
                    .await
                    .map_err(|_| ConnectionError::ReadTimeout)??,
                None => read.await?,
            };

            if n == 0 {
                // The remote closed the connection. Hand out whatever was
                // left as a final, unterminated line.
                if self.buffer.is_empty() {
                    return Err(ConnectionError::Closed);
                }

                let rest = self.buffer.split();
                return decode(&rest);
            }
        }
    }

    /// Write a single line, followed by `\n`, to the underlying stream and
    /// flush it.
    pub async fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        let deadline = self.write_deadline;
        let stream = &mut self.stream;

        let write = async move {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\n").await?;

            // Ensure the encoded line is written to the socket. The calls
            // above are to the buffered stream and writes. Calling `flush`
            // writes the remaining contents of the buffer to the socket.
            stream.flush().await
        };

        match deadline {
            Some(deadline) => time::timeout_at(deadline, write)
                .await
                .map_err(|_| ConnectionError::WriteTimeout)??,
            None => write.await?,
        }

        Ok(())
    }

    /// Tries to split one complete line off the read buffer.
    fn parse_line(&mut self) -> Result<Option<String>, ConnectionError> {
        let limit = self.max_line_size;

        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(end) => {
                let line = self.buffer.split_to(end);
                // Discard the `\n`.
                self.buffer.advance(1);

                if line.len() > limit + usize::from(line.ends_with(b"\r")) {
                    return Err(ConnectionError::LineTooLong { limit });
                }

                decode(&line).map(Some)
            }
            // Even a terminator arriving next could not make the line fit.
            None if self.buffer.len() > limit + usize::from(self.buffer.ends_with(b"\r")) => {
                Err(ConnectionError::LineTooLong { limit })
            }
            None => Ok(None),
        }
    }
}

fn decode(line: &[u8]) -> Result<String, ConnectionError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    String::from_utf8(line.to_vec()).map_err(|_| ConnectionError::InvalidUtf8)
}
