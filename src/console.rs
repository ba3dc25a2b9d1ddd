//! Local console mode.
//!
//! Commands are read line by line from one stream and answered on another,
//! against a storage engine, without any networking. The responses are the
//! same as a server session's.

use crate::session::{error_response, respond};
use crate::{ConnectionError, Storage};

use std::future::Future;
use std::io;
use std::str;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

/// Reads commands from `reader` and writes one response line per command to
/// `writer`, until `reader` ends or `shutdown` completes.
///
/// A command is never interrupted by `shutdown` once its response is being
/// written: shutdown is only observed while waiting for input.
///
/// # Errors
///
/// Returns the first I/O error of either stream.
pub async fn run<R, W>(
    reader: R,
    writer: W,
    storage: Arc<dyn Storage>,
    shutdown: impl Future,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut console = Console {
        reader: BufReader::new(reader),
        writer: BufWriter::new(writer),
        storage,
    };

    tokio::select! {
        biased;

        _ = shutdown => {
            debug!("console stopped by shutdown signal");
            Ok(())
        }
        res = console.run() => res,
    }
}

struct Console<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    storage: Arc<dyn Storage>,
}

impl<R, W> Console<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn run(&mut self) -> io::Result<()> {
        let mut buf = Vec::new();

        loop {
            buf.clear();

            // `0` indicates "end of stream".
            if self.reader.read_until(b'\n', &mut buf).await? == 0 {
                debug!("console input closed");
                return Ok(());
            }

            let line = buf.strip_suffix(b"\n").unwrap_or(&buf);
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            let response = match str::from_utf8(line) {
                Ok(line) => respond(line, &*self.storage).await,
                Err(_) => error_response(&ConnectionError::InvalidUtf8),
            };

            self.writer.write_all(response.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;
        }
    }
}
