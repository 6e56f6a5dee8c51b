//! Bookkeeping for messages that are currently being processed.
//!
//! Every spawned processing task is registered here for exactly as long as it
//! runs. Shutdown uses [`InflightRegistry::drain`] to wait for the set to empty.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use tokio::{sync::Notify, task::JoinHandle, time::Instant};

use crate::error::Error;

/// One admitted, running processing attempt.
#[derive(Debug, Clone)]
pub struct InflightTask {
    pub id: u64,
    pub msg_id: String,
    pub started_at: Instant,
}

#[derive(Clone, Default)]
pub struct InflightRegistry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    tasks: papaya::HashMap<u64, InflightTask>,
    next_id: AtomicU64,
    closed: AtomicBool,
    changed: Notify,
}

/// Deregisters its task when dropped, including during a panic unwind.
#[must_use = "dropping the guard deregisters the task immediately"]
pub struct InflightGuard {
    registry: InflightRegistry,
    id: u64,
}

impl InflightGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of the tasks currently registered.
    pub fn tasks(&self) -> Vec<InflightTask> {
        self.inner
            .tasks
            .pin()
            .iter()
            .map(|(_, task)| task.clone())
            .collect()
    }

    /// Adds a task for `msg_id`. Fails once the registry has been closed.
    pub fn register(&self, msg_id: impl Into<String>) -> Result<InflightGuard, Error> {
        if self.is_closed() {
            return Err(Error::RegistryClosed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let task = InflightTask {
            id,
            msg_id: msg_id.into(),
            started_at: Instant::now(),
        };
        self.inner.tasks.pin().insert(id, task);

        // A drainer may have observed an empty set between the check above and
        // the insert. Back out so it never misses this task.
        if self.is_closed() {
            self.deregister(id);
            return Err(Error::RegistryClosed);
        }

        Ok(InflightGuard {
            registry: self.clone(),
            id,
        })
    }

    /// Removes a task. Returns whether it was still registered.
    pub fn deregister(&self, id: u64) -> bool {
        let removed = self.inner.tasks.pin().remove(&id).is_some();
        if removed {
            self.inner.changed.notify_waiters();
        }
        removed
    }

    /// Registers a task for `msg_id` and spawns `fut` on the runtime. The task is
    /// deregistered when `fut` finishes, panics or is aborted.
    pub fn spawn<F>(&self, msg_id: impl Into<String>, fut: F) -> Result<JoinHandle<F::Output>, Error>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.register(msg_id)?;

        Ok(tokio::spawn(async move {
            let _guard = guard;
            fut.await
        }))
    }

    /// Refuses any further registration.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
    }

    /// Waits until no task is registered or `deadline` passes.
    pub async fn drain(&self, deadline: Instant) -> Result<(), Error> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.len();
                if remaining == 0 {
                    return Ok(());
                }
                return Err(Error::DrainTimeout { remaining });
            }
        }
    }
}
