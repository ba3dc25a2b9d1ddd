//! The storage port.
//!
//! Sessions never touch key-value state directly; they go through a
//! `Storage` implementation shared by every connection of the server. Any
//! engine may be plugged in as long as it can be called concurrently from
//! many sessions without external locking.

use crate::config::{EngineConfig, EngineKind};
use crate::Db;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Capability consumed by sessions: three operations over string keys and
/// values.
///
/// Implementations must be internally synchronized. Sessions call into the
/// same instance from many tasks at once and impose no ordering between
/// them; last write wins is acceptable.
///
/// Every operation is a future. A caller cancels an operation by dropping
/// it; a session that is torn down mid-command drops the storage call with
/// it.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Inserts or replaces the value stored under `key`.
    async fn set(&self, key: String, value: String) -> Result<(), StorageError>;

    /// Returns the value stored under `key`.
    ///
    /// Fails with `StorageError::NotFound` if the key is absent.
    async fn get(&self, key: &str) -> Result<String, StorageError>;

    /// Removes `key`.
    ///
    /// Fails with `StorageError::NotFound` if the key is absent.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Errors produced by a storage engine.
///
/// These are reported to the client as `ERROR: <message>`; none of them
/// ends the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The key is absent.
    #[error("key '{key}' not found")]
    NotFound { key: String },

    /// The engine could not serve the request.
    #[error("storage failure: {0}")]
    Internal(String),
}

impl StorageError {
    pub(crate) fn not_found(key: impl ToString) -> StorageError {
        StorageError::NotFound {
            key: key.to_string(),
        }
    }

    /// Returns `true` for the distinguished not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Opens the engine selected by the configuration.
pub fn open(config: &EngineConfig) -> Arc<dyn Storage> {
    debug!(engine = ?config.kind, "opening storage engine");

    match config.kind {
        EngineKind::InMemory => Arc::new(Db::new()),
    }
}
