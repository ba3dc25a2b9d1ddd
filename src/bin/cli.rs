//! Interactive console for a mini-kv server.
//!
//! Every line typed on stdin is sent verbatim and the response line is
//! printed back.

use mini_kv::client::{self, ClientError};
use mini_kv::DEFAULT_ADDRESS;

use clap::Parser;
use std::io::Write;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{error, warn};

#[derive(Parser, Debug)]
#[clap(name = "mini-kv-cli", version, author, about = "Issue mini-kv commands")]
struct Cli {
    /// Address of the server.
    #[clap(long, default_value = DEFAULT_ADDRESS)]
    address: String,
}

/// Entry point for CLI tool.
///
/// `flavor = "current_thread"` is used here to avoid spawning background
/// threads. The CLI tool use case benefits more by being lighter instead of
/// multi-threaded.
#[tokio::main(flavor = "current_thread")]
async fn main() -> mini_kv::Result<()> {
    // Enable logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init()?;

    let cli = Cli::parse();

    let mut client = client::connect(&cli.address).await?;

    println!("Waiting for command");
    prompt()?;

    let mut lines = LinesStream::new(BufReader::new(io::stdin()).lines());

    while let Some(line) = lines.next().await {
        let line = line?;

        match client.execute(&line).await {
            Ok(response) => println!("{}", response),
            Err(ClientError::Server(msg)) => println!("ERROR: {}", msg),
            Err(err) if err.is_fatal() => {
                error!(cause = %err, "connection lost");
                break;
            }
            Err(err) => warn!(cause = %err, "command failed"),
        }

        prompt()?;
    }

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "@> ")?;
    stdout.flush()
}
