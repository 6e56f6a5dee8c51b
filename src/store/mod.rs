//! Persistence of enriched results.
//!
//! Stores are keyed by `msg_id` and must be idempotent: upserting the same
//! message twice leaves exactly one document, and deleting a missing id is not
//! an error. Redelivered messages rely on both properties.

use futures_util::future::BoxFuture;

use crate::{error::Error, record::Document};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryResultStore;
pub use sqlite::SqliteResultStore;

pub trait ResultStore: Send + Sync + 'static {
    /// Inserts `document`, replacing any document with the same `msg_id`.
    fn upsert<'a>(&'a self, msg_id: &'a str, document: Document) -> BoxFuture<'a, Result<(), Error>>;

    /// Removes the document for `msg_id`. Returns whether one existed.
    fn delete<'a>(&'a self, msg_id: &'a str) -> BoxFuture<'a, Result<bool, Error>>;

    /// Loads the document for `msg_id`, if any.
    fn get<'a>(&'a self, msg_id: &'a str) -> BoxFuture<'a, Result<Option<Document>, Error>>;
}
