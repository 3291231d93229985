// Immediate-Mode Gate (bounded concurrency, reject instead of wait)

use crate::error::AdmissionRejected;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Snapshot of gate occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateMetrics {
    pub capacity: usize,
    pub in_use: usize,
}

/// Counting semaphore of capacity K in front of synchronous execution
pub struct ImmediateGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Held for the whole immediate execution; the slot is returned on drop
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ImmediateGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot or fail with `Busy` immediately. Never waits.
    pub fn try_acquire(&self) -> Result<GatePermit, AdmissionRejected> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map(|permit| GatePermit { _permit: permit })
            .map_err(|_| AdmissionRejected::Busy {
                capacity: self.capacity,
            })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn metrics(&self) -> GateMetrics {
        GateMetrics {
            capacity: self.capacity,
            in_use: self.in_use(),
        }
    }
}
