//! Outbound status records.
//!
//! Every message that reaches a terminal state (`done` or `deleted`) is
//! announced on the output destination. Consumers of that destination may
//! assume the stored document already reflects the announced state.

use futures_util::future::BoxFuture;

use crate::{error::Error, record::StatusRecord};

pub mod memory;
pub mod sqs;

pub use memory::MemoryPublisher;
pub use sqs::SqsPublisher;

pub trait ResultPublisher: Send + Sync + 'static {
    fn publish<'a>(&'a self, status: &'a StatusRecord) -> BoxFuture<'a, Result<(), Error>>;
}
