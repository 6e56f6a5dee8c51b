//! The receive loop and the per-message processing pipeline.
//!
//! # Lifecycle
//!
//! A [`Consumer`] moves through three states:
//!
//! 1. `Running`: permits are taken from the [`AdmissionGate`] before each
//!    receive, so the number of received but unfinished messages never exceeds
//!    the configured concurrency. Each delivery is decoded and handed to its own
//!    task, tracked by the [`InflightRegistry`].
//! 2. `Draining`: entered when the shutdown token fires. The receive loop has
//!    stopped and the registry refuses new work. Running tasks continue until
//!    they finish or the drain deadline passes.
//! 3. `Stopped`: the drain finished or timed out. Anything still unacknowledged
//!    is redelivered by the broker.
//!
//! # Per-message ordering
//!
//! For `update` messages the document is stored before the status record is
//! published, and the delivery is acknowledged last. A message is never
//! acknowledged before its side effects are durable.

use std::time::Duration;

use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use crate::{
    context::Context,
    enrichment,
    error::Error,
    gate::{AdmissionGate, Permit},
    record::{MessageType, Record, StatusRecord},
    registry::InflightRegistry,
    retry::RetryRouter,
    transport::Delivery,
};

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConsumerState {
    Running,
    Draining,
    Stopped,
}

/// What a message handler achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Completion {
    Updated,
    Deleted,
    /// Unknown message type, acknowledged without doing anything.
    Ignored,
}

/// Result of handling one decoded record.
#[derive(Debug)]
pub enum Outcome {
    Success(Completion),
    /// May succeed on another attempt. Goes through the [`RetryRouter`].
    Retryable(Error),
    /// Can never succeed. Dead-lettered without a retry.
    Terminal(Error),
}

/// Summary of a finished drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks still running when the deadline passed.
    pub abandoned: usize,
}

pub struct Consumer {
    context: Context,
    gate: AdmissionGate,
    registry: InflightRegistry,
    router: RetryRouter,
    batch_size: usize,
    drain_timeout: Duration,
    receive_backoff: Duration,
    state: watch::Sender<ConsumerState>,
}

#[bon::bon]
impl Consumer {
    #[builder]
    pub fn new(
        context: Context,
        concurrency: usize,
        max_retries: u32,
        #[builder(default)] retry_delay: Duration,
        #[builder(default = DEFAULT_BATCH_SIZE)] batch_size: usize,
        #[builder(default = Duration::from_secs(30))] drain_timeout: Duration,
        #[builder(default = Duration::from_secs(1))] receive_backoff: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Running);

        Self {
            context,
            gate: AdmissionGate::new(concurrency.max(1)),
            registry: InflightRegistry::new(),
            router: RetryRouter::new(max_retries).with_delay(retry_delay),
            batch_size: batch_size.max(1),
            drain_timeout,
            receive_backoff,
            state,
        }
    }
}

impl Consumer {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn registry(&self) -> &InflightRegistry {
        &self.registry
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        tracing::info!(from = %previous, to = %next, "consumer state changed");
    }

    /// Consumes until `shutdown` fires, then drains in-flight work.
    pub async fn run(&self, shutdown: CancellationToken) -> DrainReport {
        self.transition(ConsumerState::Running);
        tracing::info!(
            concurrency = self.gate.capacity(),
            max_retries = self.router.max_retries(),
            "consumer started"
        );

        self.receive_loop(&shutdown).await;

        self.transition(ConsumerState::Draining);
        self.registry.close();
        tracing::info!(
            inflight = self.registry.len(),
            timeout_secs = self.drain_timeout.as_secs(),
            "waiting for in-flight messages"
        );

        let report = match self.registry.drain(Instant::now() + self.drain_timeout).await {
            Ok(()) => DrainReport { abandoned: 0 },
            Err(e) => {
                let abandoned = self.registry.len();
                for task in self.registry.tasks() {
                    tracing::warn!(
                        msg_id = %task.msg_id,
                        elapsed_ms = task.started_at.elapsed().as_millis() as u64,
                        "abandoning in-flight message to broker redelivery"
                    );
                }
                tracing::warn!(error = %e, abandoned, "drain deadline elapsed");
                DrainReport { abandoned }
            }
        };

        self.gate.close();
        self.transition(ConsumerState::Stopped);

        report
    }

    async fn receive_loop(&self, shutdown: &CancellationToken) {
        loop {
            let mut permits = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permits = self.gate.acquire_batch(self.batch_size) => match permits {
                    Ok(permits) => permits,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.context.transport.receive(permits.count()) => received,
            };

            let deliveries = match received {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    drop(permits);
                    tracing::warn!(
                        error = %e,
                        backoff_ms = self.receive_backoff.as_millis() as u64,
                        "receive failed, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.receive_backoff) => continue,
                    }
                }
            };

            for delivery in deliveries {
                let permit = match permits.split(1) {
                    Some(permit) => permit,
                    // The transport returned more than requested.
                    None => match self.gate.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                self.dispatch(delivery, permit).await;
            }
        }

        tracing::info!("receive loop stopped");
    }

    async fn dispatch(&self, delivery: Delivery, permit: Permit) {
        let record = match Record::decode(&delivery.body) {
            Ok(record) => record,
            Err(e) => {
                self.reject_undecodable(delivery, permit, e);
                return;
            }
        };

        let msg_id = record.msg_id.clone();
        let span = tracing::info_span!(
            "message",
            msg_id = %msg_id,
            kind = %record.kind,
            retry_count = delivery.retry_count,
        );

        let context = self.context.clone();
        let router = self.router.clone();

        let task = async move {
            let _permit = permit;
            process(context, router, delivery, record).await;
        }
        .instrument(span);

        if let Err(e) = self.registry.spawn(msg_id.clone(), task) {
            tracing::warn!(msg_id = %msg_id, error = %e, "message not admitted, leaving it to redelivery");
        }
    }

    /// Dead-letters a delivery that failed to decode, keeping its retry count.
    /// The send runs as a registered task holding the delivery's permit.
    fn reject_undecodable(&self, delivery: Delivery, permit: Permit, cause: Error) {
        let label = delivery
            .message_id
            .clone()
            .unwrap_or_else(|| delivery.receipt.clone());
        let span = tracing::info_span!(
            "undecodable",
            message_id = %label,
            retry_count = delivery.retry_count,
        );

        tracing::warn!(
            message_id = %label,
            retry_count = delivery.retry_count,
            error = %cause,
            "undecodable message, dead-lettering"
        );

        let transport = self.context.transport.clone();
        let task = async move {
            let _permit = permit;
            if let Err(e) = transport.dead_letter(&delivery, delivery.retry_count).await {
                tracing::error!(error = %e, "failed to dead-letter undecodable message");
            }
        }
        .instrument(span);

        if let Err(e) = self.registry.spawn(label.clone(), task) {
            tracing::warn!(message_id = %label, error = %e, "undecodable message left to redelivery");
        }
    }
}

/// Runs the handler for one record and settles the delivery.
async fn process(context: Context, router: RetryRouter, delivery: Delivery, record: Record) {
    let msg_id = record.msg_id.clone();
    let transport = context.transport.as_ref();

    match handle(&context, record).await {
        Outcome::Success(completion) => {
            if let Err(e) = transport.ack(&delivery).await {
                tracing::error!(
                    %completion,
                    error = %e,
                    "acknowledge failed, message will be redelivered"
                );
            }
        }
        Outcome::Retryable(cause) => {
            if let Err(e) = router.route(transport, &delivery, &msg_id, &cause).await {
                tracing::error!(
                    cause = %cause,
                    error = %e,
                    "retry routing failed, message will be redelivered"
                );
            }
        }
        Outcome::Terminal(cause) => {
            tracing::warn!(error = %cause, "unprocessable message, dead-lettering");
            if let Err(e) = transport.dead_letter(&delivery, delivery.retry_count).await {
                tracing::error!(error = %e, "failed to dead-letter message");
            }
        }
    }
}

/// Dispatches a record by type.
pub async fn handle(context: &Context, record: Record) -> Outcome {
    let result = match record.kind.clone() {
        MessageType::Update => process_update(context, record)
            .await
            .map(|()| Completion::Updated),
        MessageType::Delete => process_delete(context, record)
            .await
            .map(|()| Completion::Deleted),
        MessageType::Unknown(kind) => {
            tracing::warn!(msg_id = %record.msg_id, kind = %kind, "unknown message type, ignoring");
            Ok(Completion::Ignored)
        }
    };

    match result {
        Ok(completion) => Outcome::Success(completion),
        Err(e) if e.is_unprocessable() => Outcome::Terminal(e),
        Err(e) => Outcome::Retryable(e),
    }
}

async fn process_update(context: &Context, record: Record) -> Result<(), Error> {
    let result = enrichment::run_isolated(context.enrichment.clone(), record).await?;
    let msg_id = result.record.msg_id.as_str();

    context.store.upsert(msg_id, result.document()).await?;
    context.publisher.publish(&result.status_record()).await?;

    tracing::info!(
        msg_id,
        score = ?result.score,
        duration_ms = result.duration.as_millis() as u64,
        status = %result.status,
        "message processed"
    );

    Ok(())
}

async fn process_delete(context: &Context, record: Record) -> Result<(), Error> {
    let existed = context.store.delete(&record.msg_id).await?;
    context
        .publisher
        .publish(&StatusRecord::deleted(record.msg_id.as_str()))
        .await?;

    tracing::info!(msg_id = %record.msg_id, existed, "document deleted");

    Ok(())
}
