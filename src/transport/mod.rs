//! Inbound message transport.
//!
//! The worker only relies on at-least-once semantics: a delivery that is
//! never acknowledged is eventually handed out again. [`sqs::SqsTransport`]
//! talks to any SQS-compatible broker; [`memory::MemoryTransport`] keeps
//! everything in process.

use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::Error;

pub mod memory;
pub mod sqs;

/// Name of the message attribute carrying the retry count.
pub const RETRY_COUNT_ATTRIBUTE: &str = "retry_count";

/// A message handed out by the transport and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned id, used for logging only.
    pub message_id: Option<String>,
    /// Opaque handle used to acknowledge this specific delivery.
    pub receipt: String,
    pub body: String,
    /// Value of the retry-count attribute, `0` when absent.
    pub retry_count: u32,
}

/// Parses the retry-count attribute. Missing or garbled values count as zero.
pub fn parse_retry_count(value: Option<&str>) -> u32 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

pub trait Transport: Send + Sync + 'static {
    /// Waits for up to `max` deliveries. May return an empty batch when the
    /// poll window elapses without traffic.
    fn receive(&self, max: usize) -> BoxFuture<'_, Result<Vec<Delivery>, Error>>;

    /// Marks a delivery as done so it is never redelivered.
    fn ack<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<(), Error>>;

    /// Rejects a delivery without requeueing it. The body is moved unchanged to
    /// the dead-letter destination.
    fn dead_letter<'a>(
        &'a self,
        delivery: &'a Delivery,
        retry_count: u32,
    ) -> BoxFuture<'a, Result<(), Error>>;

    /// Sends the body of `delivery` back to the input destination carrying
    /// `retry_count`. The original delivery is left untouched.
    fn republish<'a>(
        &'a self,
        delivery: &'a Delivery,
        retry_count: u32,
        delay: Duration,
    ) -> BoxFuture<'a, Result<(), Error>>;
}
