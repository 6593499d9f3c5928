//! Fixed-capacity worker pools gating one pipeline stage each.
//!
//! A [`WorkerPool`] is a counting semaphore with a name. [`WorkerPool::acquire`]
//! suspends until a slot is free and returns a [`WorkerPermit`]; the slot is
//! returned when the permit is dropped, so every exit path of the holder
//! (success, `?`, panic unwinding) releases it.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Errors from pool construction or acquisition.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A pool must admit at least one unit of work.
    #[error("worker pool '{name}' must have capacity >= 1")]
    ZeroCapacity {
        /// Pool name.
        name: &'static str,
    },

    /// The semaphore was closed while waiting.
    #[error("worker pool '{name}' is closed")]
    Closed {
        /// Pool name.
        name: &'static str,
    },
}

/// Bounded concurrency gate for one pipeline stage.
///
/// Cloning is cheap and shares the same slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Creates a pool admitting at most `capacity` concurrent holders.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ZeroCapacity`] when `capacity` is 0.
    pub fn new(name: &'static str, capacity: usize) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity { name });
        }
        Ok(Self {
            name,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool was closed.
    pub async fn acquire(&self) -> Result<WorkerPermit, PoolError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed { name: self.name })?;
        trace!(pool = self.name, available = self.available(), "slot acquired");
        Ok(WorkerPermit { _permit: permit })
    }

    /// Pool name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
}

impl WorkerPermit {
    /// Releases the slot explicitly.
    pub fn release(self) {
        drop(self);
    }
}
