//! mini-kv server.
//!
//! This file is the entry point for the server implemented in the library.
//! It parses the command line, loads the configuration and passes it to
//! `mini_kv::server`, or to `mini_kv::console` when `--local` is given.
//!
//! The `clap` crate is used for parsing arguments.

use mini_kv::{console, logging, server, storage, Config};

use clap::Parser;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[clap(name = "mini-kv-server", version, author, about = "A key-value server")]
struct Cli {
    /// Path of the YAML configuration file.
    #[clap(long, default_value = "./config.yml")]
    config: PathBuf,

    /// Listen address, overriding the configured one.
    #[clap(long)]
    address: Option<String>,

    /// Serve commands from stdin on stdout instead of listening.
    #[clap(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // A broken configuration is not fatal: the server starts with defaults
    // and reports the problem once logging is up.
    let (mut config, load_error) = match Config::load(&cli.config) {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };

    if let Some(address) = cli.address {
        config.network.address = address;
    }

    // In local mode stdout carries the responses.
    if cli.local && config.logging.output == "stdout" {
        config.logging.output = "stderr".to_string();
    }

    if let Err(err) = logging::init(&config.logging) {
        eprintln!("failed to initialize logging: {}", err);
        return ExitCode::FAILURE;
    }

    if let Some(err) = load_error {
        error!(path = %cli.config.display(), cause = %err, "failed to load configuration, using defaults");
    }

    if let Err(err) = config.validate() {
        error!(cause = %err, "invalid configuration");
        return ExitCode::FAILURE;
    }

    // Installed before serving, so a signal that arrives right after the
    // listener is ready is not lost.
    let shutdown = match shutdown_signal() {
        Ok(shutdown) => shutdown,
        Err(err) => {
            error!(cause = %err, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let storage = storage::open(&config.engine);

    if cli.local {
        info!("serving commands from stdin");

        return match console::run(tokio::io::stdin(), tokio::io::stdout(), storage, shutdown).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(cause = %err, "console failed");
                ExitCode::FAILURE
            }
        };
    }

    match server::run(config.network, storage, shutdown).await {
        Err(err) if err.is_cancelled() => {
            info!("server stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(cause = %err, "server failed");
            ExitCode::FAILURE
        }
        Ok(()) => ExitCode::SUCCESS,
    }
}

/// Completes on Ctrl-C or SIGTERM.
#[cfg(unix)]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::SignalKind;

    let mut terminate = signal::unix::signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = signal::ctrl_c() => info!("received Ctrl-C"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    })
}

/// Completes on Ctrl-C.
#[cfg(not(unix))]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    Ok(async {
        let _ = signal::ctrl_c().await;
    })
}
