use std::time::Duration;

use aws_sdk_sqs::types::MessageAttributeValue;
use futures_util::{future::BoxFuture, FutureExt as _};

use super::{parse_retry_count, Delivery, Transport, RETRY_COUNT_ATTRIBUTE};
use crate::error::Error;

/// SQS caps a single receive at ten messages.
pub const MAX_BATCH: usize = 10;

/// Resolves a queue name to its URL on the broker.
pub async fn queue_url(client: &aws_sdk_sqs::Client, name: &str) -> Result<String, Error> {
    let output = client
        .get_queue_url()
        .queue_name(name)
        .send()
        .await
        .map_err(|e| Error::transport(format!("resolving queue {name}"), e))?;

    output
        .queue_url()
        .map(str::to_owned)
        .ok_or_else(|| Error::Transport {
            message: format!("broker returned no URL for queue {name}"),
            source: None,
        })
}

pub(crate) fn retry_attribute(retry_count: u32) -> Result<MessageAttributeValue, Error> {
    MessageAttributeValue::builder()
        .data_type("Number")
        .string_value(retry_count.to_string())
        .build()
        .map_err(|e| Error::transport("building retry_count attribute", e))
}

/// Transport backed by an SQS-compatible broker.
///
/// Acknowledging deletes the message. Dead-lettering copies the body to the
/// dead-letter queue before deleting the original, so a crash in between can
/// only duplicate, never lose, the message.
#[derive(Clone, Debug)]
pub struct SqsTransport {
    client: aws_sdk_sqs::Client,
    input_url: String,
    dead_letter_url: String,
    wait_time: Duration,
}

#[bon::bon]
impl SqsTransport {
    #[builder]
    pub async fn connect(
        client: aws_sdk_sqs::Client,
        input_queue: &str,
        dead_letter_queue: &str,
        wait_time: Duration,
    ) -> Result<Self, Error> {
        let input_url = queue_url(&client, input_queue).await?;
        let dead_letter_url = queue_url(&client, dead_letter_queue).await?;

        tracing::info!(%input_url, %dead_letter_url, "resolved transport queues");

        Ok(Self {
            client,
            input_url,
            dead_letter_url,
            wait_time,
        })
    }

    async fn delete(&self, delivery: &Delivery) -> Result<(), Error> {
        self.client
            .delete_message()
            .queue_url(&self.input_url)
            .receipt_handle(&delivery.receipt)
            .send()
            .await
            .map_err(|e| Error::transport("deleting message", e))?;
        Ok(())
    }

    async fn send(
        &self,
        queue_url: &str,
        body: &str,
        retry_count: u32,
        delay: Duration,
    ) -> Result<(), Error> {
        let mut request = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .message_attributes(RETRY_COUNT_ATTRIBUTE, retry_attribute(retry_count)?);

        if !delay.is_zero() {
            // SQS accepts at most 15 minutes of delay.
            request = request.delay_seconds(delay.as_secs().min(900) as i32);
        }

        request
            .send()
            .await
            .map_err(|e| Error::transport(format!("sending message to {queue_url}"), e))?;
        Ok(())
    }
}

impl Transport for SqsTransport {
    fn receive(&self, max: usize) -> BoxFuture<'_, Result<Vec<Delivery>, Error>> {
        async move {
            let max = max.clamp(1, MAX_BATCH);

            let output = self
                .client
                .receive_message()
                .queue_url(&self.input_url)
                .max_number_of_messages(max as i32)
                .wait_time_seconds(self.wait_time.as_secs() as i32)
                .message_attribute_names(RETRY_COUNT_ATTRIBUTE)
                .send()
                .await
                .map_err(|e| Error::transport("receiving messages", e))?;

            let mut deliveries = Vec::with_capacity(max);

            for message in output.messages() {
                let Some(receipt) = message.receipt_handle() else {
                    tracing::warn!(message_id = ?message.message_id(), "message without receipt handle");
                    continue;
                };

                let retry_count = parse_retry_count(
                    message
                        .message_attributes()
                        .and_then(|attrs| attrs.get(RETRY_COUNT_ATTRIBUTE))
                        .and_then(|value| value.string_value()),
                );

                deliveries.push(Delivery {
                    message_id: message.message_id().map(str::to_owned),
                    receipt: receipt.to_owned(),
                    body: message.body().unwrap_or_default().to_owned(),
                    retry_count,
                });
            }

            Ok(deliveries)
        }
        .boxed()
    }

    fn ack<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<(), Error>> {
        self.delete(delivery).boxed()
    }

    fn dead_letter<'a>(
        &'a self,
        delivery: &'a Delivery,
        retry_count: u32,
    ) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            self.send(&self.dead_letter_url, &delivery.body, retry_count, Duration::ZERO)
                .await?;
            self.delete(delivery).await
        }
        .boxed()
    }

    fn republish<'a>(
        &'a self,
        delivery: &'a Delivery,
        retry_count: u32,
        delay: Duration,
    ) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            self.send(&self.input_url, &delivery.body, retry_count, delay)
                .await
        }
        .boxed()
    }
}
