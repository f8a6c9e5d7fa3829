//! AWS SQS queue transport.
//!
//! Pulls with a zero wait time so the consumer loop never blocks on the
//! transport; idle backoff is the caller's responsibility. Message
//! attributes (including `message-type`) are carried as SQS string
//! message attributes. Acknowledge maps to `DeleteMessage`.

use async_trait::async_trait;
use aws_sdk_sqs::types::Message as SqsMessage;
use aws_sdk_sqs::Client;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

use crate::{QueueError, QueueTransport, Result};
use relay_common::MessageEnvelope;

pub struct SqsTransport {
    client: Client,
    queue_url: String,
    subscription: String,
}

impl SqsTransport {
    pub fn new(client: Client, queue_url: String, subscription: String) -> Self {
        Self {
            client,
            queue_url,
            subscription,
        }
    }

    /// Create from a queue URL, using the last path segment as the
    /// subscription name.
    pub fn from_queue_url(client: Client, queue_url: String) -> Self {
        let subscription = queue_url
            .rsplit('/')
            .next()
            .unwrap_or("unknown")
            .to_string();
        Self::new(client, queue_url, subscription)
    }

    fn parse_message(&self, sqs_msg: SqsMessage) -> Result<MessageEnvelope> {
        let body = sqs_msg
            .body()
            .ok_or_else(|| QueueError::Sqs("Message body is empty".to_string()))?
            .to_string();

        let ack_id = sqs_msg
            .receipt_handle()
            .ok_or_else(|| QueueError::Sqs("Missing receipt handle".to_string()))?
            .to_string();

        let id = sqs_msg
            .message_id()
            .ok_or_else(|| QueueError::Sqs("Missing message id".to_string()))?
            .to_string();

        let mut attributes = HashMap::new();
        if let Some(message_attributes) = sqs_msg.message_attributes {
            for (name, value) in message_attributes {
                if let Some(text) = value.string_value() {
                    attributes.insert(name, text.to_string());
                }
            }
        }

        Ok(MessageEnvelope::new(
            id,
            Bytes::from(body),
            attributes,
            ack_id,
        ))
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    fn subscription(&self) -> &str {
        &self.subscription
    }

    async fn pull(&self, max_messages: u32) -> Result<Vec<MessageEnvelope>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.min(10) as i32) // SQS max is 10
            .wait_time_seconds(0)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| QueueError::Sqs(e.to_string()))?;

        let sqs_messages = result.messages.unwrap_or_default();
        let mut messages = Vec::with_capacity(sqs_messages.len());
        for sqs_msg in sqs_messages {
            messages.push(self.parse_message(sqs_msg)?);
        }

        if !messages.is_empty() {
            debug!(
                subscription = %self.subscription,
                count = messages.len(),
                "Pulled messages from SQS"
            );
        }

        Ok(messages)
    }

    async fn acknowledge(&self, ack_id: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(ack_id)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(e.to_string()))?;

        debug!(
            subscription = %self.subscription,
            "Message acknowledged in SQS"
        );
        Ok(())
    }
}
