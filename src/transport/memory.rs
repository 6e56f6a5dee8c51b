//! In-process transport with the same delivery semantics as a broker queue.
//!
//! Unacknowledged deliveries stay in an "unacked" set and can be pushed back to
//! the queue with [`MemoryTransport::requeue_unacked`], which is what a broker
//! does when a consumer disconnects.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures_util::{future::BoxFuture, FutureExt as _};
use tokio::sync::Notify;

use super::{Delivery, Transport};
use crate::error::Error;

/// A message moved to the dead-letter destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub body: String,
    pub retry_count: u32,
}

/// A message sent back to the input queue for another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Republished {
    pub body: String,
    pub retry_count: u32,
    pub delay: Duration,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    arrived: Notify,
    next_id: AtomicU64,
    receive_failures: AtomicUsize,
    poll_window: Mutex<Option<Duration>>,
}

#[derive(Default)]
struct State {
    ready: VecDeque<(String, u32)>,
    unacked: HashMap<String, Delivery>,
    acked: Vec<Delivery>,
    dead_letters: Vec<DeadLetter>,
    republished: Vec<Republished>,
}

const DEFAULT_POLL_WINDOW: Duration = Duration::from_millis(50);

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// How long an empty `receive` waits for traffic before returning.
    pub fn set_poll_window(&self, window: Duration) {
        *self
            .inner
            .poll_window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(window);
    }

    fn poll_window(&self) -> Duration {
        self.inner
            .poll_window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .unwrap_or(DEFAULT_POLL_WINDOW)
    }

    /// Enqueues a message body with the given retry count.
    pub fn push(&self, body: impl Into<String>, retry_count: u32) {
        self.state().ready.push_back((body.into(), retry_count));
        self.inner.arrived.notify_waiters();
    }

    /// Makes the next `n` receive calls fail, as if the connection dropped.
    pub fn fail_next_receives(&self, n: usize) {
        self.inner.receive_failures.store(n, Ordering::SeqCst);
    }

    /// Returns every unacknowledged delivery to the queue.
    pub fn requeue_unacked(&self) -> usize {
        let mut state = self.state();
        let unacked: Vec<_> = state.unacked.drain().map(|(_, d)| d).collect();
        let count = unacked.len();
        for delivery in unacked {
            state.ready.push_back((delivery.body, delivery.retry_count));
        }
        drop(state);
        self.inner.arrived.notify_waiters();
        count
    }

    pub fn ready_len(&self) -> usize {
        self.state().ready.len()
    }

    pub fn unacked_len(&self) -> usize {
        self.state().unacked.len()
    }

    pub fn acked(&self) -> Vec<Delivery> {
        self.state().acked.clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().dead_letters.clone()
    }

    /// Every message sent back to the input queue, in order.
    pub fn republished(&self) -> Vec<Republished> {
        self.state().republished.clone()
    }

    fn take_ready(&self, max: usize) -> Vec<Delivery> {
        let mut state = self.state();
        let mut batch = Vec::new();

        while batch.len() < max {
            let Some((body, retry_count)) = state.ready.pop_front() else {
                break;
            };

            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let delivery = Delivery {
                message_id: Some(format!("mem-{id}")),
                receipt: format!("receipt-{id}"),
                body,
                retry_count,
            };
            state
                .unacked
                .insert(delivery.receipt.clone(), delivery.clone());
            batch.push(delivery);
        }

        batch
    }

    fn settle(&self, delivery: &Delivery) -> Result<Delivery, Error> {
        self.state()
            .unacked
            .remove(&delivery.receipt)
            .ok_or_else(|| Error::Transport {
                message: format!("unknown or expired receipt {}", delivery.receipt),
                source: None,
            })
    }
}

impl Transport for MemoryTransport {
    fn receive(&self, max: usize) -> BoxFuture<'_, Result<Vec<Delivery>, Error>> {
        async move {
            let failures = &self.inner.receive_failures;
            if failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Transport {
                    message: "connection reset".to_owned(),
                    source: None,
                });
            }

            let arrived = self.inner.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            let batch = self.take_ready(max.max(1));
            if !batch.is_empty() {
                return Ok(batch);
            }

            let _ = tokio::time::timeout(self.poll_window(), arrived).await;
            Ok(self.take_ready(max.max(1)))
        }
        .boxed()
    }

    fn ack<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            let settled = self.settle(delivery)?;
            self.state().acked.push(settled);
            Ok(())
        }
        .boxed()
    }

    fn dead_letter<'a>(
        &'a self,
        delivery: &'a Delivery,
        retry_count: u32,
    ) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            let settled = self.settle(delivery)?;
            self.state().dead_letters.push(DeadLetter {
                body: settled.body,
                retry_count,
            });
            Ok(())
        }
        .boxed()
    }

    fn republish<'a>(
        &'a self,
        delivery: &'a Delivery,
        retry_count: u32,
        delay: Duration,
    ) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            // The delay is recorded but not applied.
            self.state().republished.push(Republished {
                body: delivery.body.clone(),
                retry_count,
                delay,
            });
            self.push(delivery.body.clone(), retry_count);
            Ok(())
        }
        .boxed()
    }
}
