//! A minimal key-value server and client speaking a line oriented text
//! protocol.
//!
//! Clients send one command per line (`GET key`, `SET key value`,
//! `DELETE key`) and the server answers every command with exactly one line:
//! the value, `OK`, or `ERROR: <message>`.
//!
//! # Layout
//!
//! The major components are:
//!
//! * `server`: binds the listener, admits connections through a bounded
//!   `pool` and spawns one `session` task per admitted connection. `run`
//!   serves until the given shutdown future completes.
//!
//! * `session`: the per connection read / parse / execute / write loop with
//!   idle deadlines.
//!
//! * `connection`: line framing over any async byte stream, plus the rules
//!   deciding which I/O errors end a session.
//!
//! * `cmd`: the supported commands, parsed from a line and applied to a
//!   `Storage` implementation.
//!
//! * `storage`: the storage port. `db` holds the in-memory engine.
//!
//! * `client`: an asynchronous client for the same protocol.
//!
//! * `console`: the same commands over a pair of local streams, without a
//!   listener.
//!
//! * `config` and `logging`: the ambient plumbing used by the binaries.

pub mod client;

pub mod cmd;
pub use cmd::Command;

pub mod config;
pub use config::Config;

pub mod console;

mod connection;
pub use connection::{Connection, ConnectionError};

mod db;
pub use db::Db;

pub mod logging;

mod parse;
use parse::Parse;
pub use parse::ParseError;

pub mod pool;

pub mod server;

mod session;

mod shutdown;
use shutdown::Shutdown;

pub mod storage;
pub use storage::{Storage, StorageError};

/// Address used when no other one is configured.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:3223";

/// Error returned by most functions that glue components together.
///
/// Module boundaries use their own error enums (`ParseError`,
/// `StorageError`, `ConnectionError`, ...). Those all implement
/// `std::error::Error` and convert into this boxed type when they bubble up
/// to a binary.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for mini-kv operations.
pub type Result<T> = std::result::Result<T, Error>;
