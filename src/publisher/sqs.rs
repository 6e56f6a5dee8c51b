use futures_util::{future::BoxFuture, FutureExt as _};

use super::ResultPublisher;
use crate::{error::Error, record::StatusRecord, transport::sqs::queue_url};

/// Publishes status records as JSON bodies on an SQS-compatible queue.
#[derive(Clone, Debug)]
pub struct SqsPublisher {
    client: aws_sdk_sqs::Client,
    output_url: String,
}

impl SqsPublisher {
    pub async fn connect(client: aws_sdk_sqs::Client, output_queue: &str) -> Result<Self, Error> {
        let output_url = queue_url(&client, output_queue).await?;
        tracing::info!(%output_url, "resolved output queue");
        Ok(Self { client, output_url })
    }
}

impl ResultPublisher for SqsPublisher {
    fn publish<'a>(&'a self, status: &'a StatusRecord) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            let body = serde_json::to_string(status)
                .map_err(|e| Error::serialize("status record", e))?;

            self.client
                .send_message()
                .queue_url(&self.output_url)
                .message_body(body)
                .send()
                .await
                .map_err(|e| Error::transport("publishing status record", e))?;

            Ok(())
        }
        .boxed()
    }
}
