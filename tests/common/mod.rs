#![allow(dead_code)]

use std::{
    future::Future,
    sync::Arc,
    time::Duration,
};

use enrich_worker::{
    consumer::{Consumer, DrainReport},
    context::Context,
    enrichment::{Enrichment, LatencyEnrichment},
    publisher::MemoryPublisher,
    store::{MemoryResultStore, ResultStore},
    transport::memory::MemoryTransport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub transport: MemoryTransport,
    pub store: MemoryResultStore,
    pub publisher: MemoryPublisher,
}

impl Harness {
    pub fn new() -> Self {
        let transport = MemoryTransport::new();
        transport.set_poll_window(Duration::from_millis(10));

        Self {
            transport,
            store: MemoryResultStore::new(),
            publisher: MemoryPublisher::new(),
        }
    }

    pub fn context(&self) -> Context {
        self.context_with(Arc::new(LatencyEnrichment::immediate()))
    }

    pub fn context_with(&self, enrichment: Arc<dyn Enrichment>) -> Context {
        self.context_with_store(enrichment, Arc::new(self.store.clone()))
    }

    pub fn context_with_store(
        &self,
        enrichment: Arc<dyn Enrichment>,
        store: Arc<dyn ResultStore>,
    ) -> Context {
        Context::builder()
            .transport(Arc::new(self.transport.clone()))
            .store(store)
            .publisher(Arc::new(self.publisher.clone()))
            .enrichment(enrichment)
            .build()
    }
}

pub struct Running {
    pub consumer: Arc<Consumer>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<DrainReport>,
}

impl Running {
    pub async fn stop(self) -> DrainReport {
        self.shutdown.cancel();
        self.handle.await.expect("consumer task panicked")
    }
}

pub fn start(consumer: Consumer) -> Running {
    let consumer = Arc::new(consumer);
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn({
        let consumer = consumer.clone();
        let shutdown = shutdown.clone();
        async move { consumer.run(shutdown).await }
    });

    Running {
        consumer,
        shutdown,
        handle,
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub async fn with_timeout<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation timed out")
}
