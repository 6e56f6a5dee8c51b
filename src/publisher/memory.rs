use std::sync::{Arc, Mutex};

use futures_util::{future::BoxFuture, FutureExt as _};

use super::ResultPublisher;
use crate::{error::Error, record::StatusRecord};

/// Collects published status records in memory.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    published: Arc<Mutex<Vec<StatusRecord>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<StatusRecord> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ResultPublisher for MemoryPublisher {
    fn publish<'a>(&'a self, status: &'a StatusRecord) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            self.published
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(status.clone());
            Ok(())
        }
        .boxed()
    }
}
