use crate::{Storage, StorageError};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// In-memory storage engine shared by all connections.
///
/// `Db` is a handle to the shared state. Cloning it only increments the
/// reference count of the inner `Arc`, so every session can hold its own
/// handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct Db {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    /// The shared state is guarded by a `std::sync::Mutex` and not a Tokio
    /// mutex: no asynchronous operation runs while the lock is held and the
    /// critical sections are tiny.
    ///
    /// A Tokio mutex is mostly intended to be held across `.await` points.
    /// All other cases are usually better served by a standard mutex.
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, String>,
}

impl Db {
    /// Creates a new, empty `Db` instance.
    pub fn new() -> Db {
        Db::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the map half updated:
        // every critical section is a single `HashMap` call.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Storage for Db {
    async fn set(&self, key: String, value: String) -> Result<(), StorageError> {
        let mut state = self.lock();
        let previous = state.entries.insert(key, value);
        debug!(replaced = previous.is_some(), keys = state.entries.len(), "set");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        self.lock()
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        match state.entries.remove(key) {
            Some(_) => {
                debug!(keys = state.entries.len(), "delete");
                Ok(())
            }
            None => Err(StorageError::not_found(key)),
        }
    }
}
