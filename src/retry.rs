//! Bounded retry with dead-lettering.
//!
//! A failed message is sent back to the input queue with its retry count bumped
//! by one, until the bumped count reaches `max_retries`. At that point it is
//! rejected to the dead-letter destination instead. With `max_retries = 1` a
//! message gets a single attempt; with `max_retries = 3` it gets three.
//!
//! The router never looks at why processing failed.

use std::time::Duration;

use crate::{
    error::Error,
    transport::{Delivery, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish with this retry count and acknowledge the original.
    Reinject { retry_count: u32 },
    /// Reject without requeue. `retry_count` is the final count.
    DeadLetter { retry_count: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryRouter {
    max_retries: u32,
    delay: Duration,
}

impl RetryRouter {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    /// Delay applied to republished messages.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn decide(&self, current_retry_count: u32) -> RetryDecision {
        let retry_count = current_retry_count.saturating_add(1);

        if retry_count >= self.max_retries {
            RetryDecision::DeadLetter { retry_count }
        } else {
            RetryDecision::Reinject { retry_count }
        }
    }

    /// Applies the decision for a failed delivery.
    ///
    /// On reinjection the republish happens before the acknowledgement. If the
    /// republish fails the original stays unacknowledged and the transport
    /// redelivers it later.
    pub async fn route(
        &self,
        transport: &dyn Transport,
        delivery: &Delivery,
        msg_id: &str,
        cause: &Error,
    ) -> Result<RetryDecision, Error> {
        let decision = self.decide(delivery.retry_count);

        match decision {
            RetryDecision::Reinject { retry_count } => {
                transport.republish(delivery, retry_count, self.delay).await?;
                tracing::warn!(
                    msg_id,
                    retry_count,
                    max_retries = self.max_retries,
                    error = %cause,
                    "processing failed, message requeued"
                );
                transport.ack(delivery).await?;
            }
            RetryDecision::DeadLetter { retry_count } => {
                transport.dead_letter(delivery, retry_count).await?;
                tracing::error!(
                    msg_id,
                    retry_count,
                    max_retries = self.max_retries,
                    error = %cause,
                    "retries exhausted, message dead-lettered"
                );
            }
        }

        Ok(decision)
    }
}
