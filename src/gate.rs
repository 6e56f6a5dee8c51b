//! Admission control for in-flight work.
//!
//! The gate hands out at most `capacity` permits. The consumer acquires a permit
//! before it asks the transport for a message, so the number of received but
//! unfinished messages can never exceed the capacity.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::Error;

#[derive(Clone, Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Capacity held by one admitted message. Dropping it releases the slot.
#[derive(Debug)]
pub struct Permit {
    inner: OwnedSemaphorePermit,
}

impl Permit {
    /// Splits `n` permits out of this one. Used to hand individual slots to
    /// messages that arrived in a single batch.
    pub fn split(&mut self, n: usize) -> Option<Permit> {
        self.inner.split(n).map(|inner| Permit { inner })
    }

    pub fn count(&self) -> usize {
        self.inner.num_permits()
    }

    pub fn release(self) {
        drop(self)
    }
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Waits until a slot is free and takes it.
    pub async fn acquire(&self) -> Result<Permit, Error> {
        let inner = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::GateClosed)?;
        Ok(Permit { inner })
    }

    /// Waits for one slot, then greedily takes up to `max - 1` more that are
    /// free right now. Never waits for the extra slots.
    pub async fn acquire_batch(&self, max: usize) -> Result<Permit, Error> {
        let mut permit = self.acquire().await?;

        let extra = max.saturating_sub(1).min(self.available());
        if extra > 0 {
            if let Ok(more) = self.semaphore.clone().try_acquire_many_owned(extra as u32) {
                permit.inner.merge(more);
            }
        }

        Ok(permit)
    }

    /// Stops handing out permits. Pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
