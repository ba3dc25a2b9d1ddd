//! Connection admission.
//!
//! The server bounds the number of concurrently running sessions with a
//! fixed number of tokens. A connection that finds no free token is closed
//! right away: overload is shed, never queued.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Fixed-capacity admission gate.
#[derive(Debug)]
pub struct AdmissionPool {
    /// A `Semaphore` holds the tokens. `try_acquire_owned` never waits, which
    /// is what makes admission a fast accept-or-reject decision.
    semaphore: Arc<Semaphore>,

    capacity: usize,
}

/// One active session slot.
///
/// The slot goes back to the pool when the token is dropped. The token is
/// moved into the session task, so the slot is released on every exit path
/// of that task, including a panic.
#[derive(Debug)]
#[must_use = "dropping the token releases the slot immediately"]
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPool {
    /// Creates a pool with `capacity` free tokens.
    pub fn new(capacity: usize) -> AdmissionPool {
        AdmissionPool {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Takes a token if one is free. Never waits.
    pub fn try_acquire(&self) -> Option<AdmissionToken> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(AdmissionToken { _permit: permit }),
            // The semaphore is never closed, so both errors mean "full".
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Number of free tokens right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total number of tokens.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl AdmissionToken {
    /// Returns the slot to the pool. Same as dropping the token.
    pub fn release(self) {}
}
