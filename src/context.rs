use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};

use crate::{
    config::Config,
    enrichment::{Enrichment, LatencyEnrichment},
    error::Error,
    publisher::{ResultPublisher, SqsPublisher},
    store::{ResultStore, SqliteResultStore},
    transport::{sqs::SqsTransport, Transport},
};

/// Handles to every external collaborator the consumer talks to.
///
/// Built once at startup and cloned into each processing task.
#[derive(Clone)]
pub struct Context {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn ResultStore>,
    pub publisher: Arc<dyn ResultPublisher>,
    pub enrichment: Arc<dyn Enrichment>,
}

#[bon::bon]
impl Context {
    #[builder]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ResultStore>,
        publisher: Arc<dyn ResultPublisher>,
        enrichment: Arc<dyn Enrichment>,
    ) -> Self {
        Self {
            transport,
            store,
            publisher,
            enrichment,
        }
    }

    /// Connects to the broker and the database described by `config`.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region().to_owned()))
            .endpoint_url(config.queue_endpoint.as_str())
            .load()
            .await;

        let client = aws_sdk_sqs::Client::new(&sdk_config);

        let transport = SqsTransport::connect()
            .client(client.clone())
            .input_queue(&config.input_queue)
            .dead_letter_queue(&config.dead_letter_queue)
            .wait_time(config.wait_time())
            .call()
            .await?;

        let publisher = SqsPublisher::connect(client, &config.output_queue).await?;

        let store = SqliteResultStore::connect(config.db_path()).await?;
        if config.db_path().is_none() {
            tracing::warn!("no database path configured, results are kept in memory only");
        }

        let enrichment = LatencyEnrichment::new(config.min_latency(), config.max_latency());

        Ok(Self::builder()
            .transport(Arc::new(transport))
            .store(Arc::new(store))
            .publisher(Arc::new(publisher))
            .enrichment(Arc::new(enrichment))
            .build())
    }
}
