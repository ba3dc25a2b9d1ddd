//! Installs the global `tracing` subscriber for the binaries.
//!
//! Library code only emits events through the `tracing` macros; sessions
//! run inside a `session` span that carries the peer address, so every
//! event they emit can be attributed without threading a logger through
//! each call.

use crate::config::LoggingConfig;

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Installs a `fmt` subscriber configured from `config`.
///
/// `RUST_LOG` takes precedence over the configured level. An unknown level
/// falls back to `debug`; an output file that cannot be opened falls back
/// to stdout. Both fallbacks are reported once the subscriber is in place.
pub fn init(config: &LoggingConfig) -> crate::Result<()> {
    let level = config.level.to_ascii_lowercase();
    let known_level = LEVELS.contains(&level.as_str());

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if known_level => EnvFilter::new(&level),
        Err(_) => EnvFilter::new("debug"),
    };

    let (writer, open_error) = make_writer(&config.output);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(open_error.is_some() || is_terminal_output(&config.output))
        .try_init()?;

    if !known_level {
        error!(level = %config.level, "unknown log level, using debug");
    }
    if let Some(err) = open_error {
        error!(file_name = %config.output, cause = %err, "failed to open file for logging, using stdout");
    }

    Ok(())
}

fn is_terminal_output(output: &str) -> bool {
    matches!(output, "stdout" | "stderr")
}

/// Returns the writer for `output`, and the error that forced a fallback to
/// stdout, if any.
fn make_writer(output: &str) -> (BoxMakeWriter, Option<io::Error>) {
    match output {
        "stdout" | "" => (BoxMakeWriter::new(io::stdout), None),
        "stderr" => (BoxMakeWriter::new(io::stderr), None),
        path => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), None),
            Err(err) => (BoxMakeWriter::new(io::stdout), Some(err)),
        },
    }
}
