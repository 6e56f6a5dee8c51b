use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use futures_util::{future::BoxFuture, FutureExt as _};

use super::ResultStore;
use crate::{error::Error, record::Document};

/// Thread-safe in-memory result store.
///
/// Keeps per-operation counters so callers can observe how the store was used.
#[derive(Clone, Default)]
pub struct MemoryResultStore {
    documents: Arc<papaya::HashMap<String, Document>>,
    upserts: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn document(&self, msg_id: &str) -> Option<Document> {
        self.documents.pin().get(msg_id).cloned()
    }
}

impl ResultStore for MemoryResultStore {
    fn upsert<'a>(&'a self, msg_id: &'a str, document: Document) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            self.documents.pin().insert(msg_id.to_owned(), document);
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, msg_id: &'a str) -> BoxFuture<'a, Result<bool, Error>> {
        async move {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(self.documents.pin().remove(msg_id).is_some())
        }
        .boxed()
    }

    fn get<'a>(&'a self, msg_id: &'a str) -> BoxFuture<'a, Result<Option<Document>, Error>> {
        async move { Ok(self.document(msg_id)) }.boxed()
    }
}
