//! Message processing pipeline.
//!
//! Runs decode → validate → handle → acknowledge/track-failure for one
//! message and classifies every error into a handling policy:
//!
//! - decode and validation errors are irrecoverable for the message: it
//!   is acknowledged first so the transport never redelivers it, then
//!   the failure is logged and processing stops;
//! - business errors are recorded in the failure tracker and the message
//!   is left unacknowledged for natural redelivery, unless its try count
//!   has reached the quarantine threshold, in which case it is forcibly
//!   acknowledged;
//! - infrastructure-connectivity errors are the only class that crosses
//!   the pipeline boundary, terminating the worker.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

use relay_common::MessageEnvelope;
use relay_queue::QueueTransport;

use crate::ack::AckGate;
use crate::failure::{FailureDetail, FailureTracker};
use crate::handler::{HandlerError, MessageHandler};
use crate::registry::MessageBinding;
use crate::schema::SchemaRegistry;

/// Per-message context handed to the pipeline and the handler. Created
/// for one pull iteration and discarded with it.
pub struct ProcessingRequest {
    envelope: MessageEnvelope,
    binding: MessageBinding,
    subscription: String,
    gate: AckGate,
}

impl ProcessingRequest {
    pub fn new(
        envelope: MessageEnvelope,
        binding: MessageBinding,
        transport: Arc<dyn QueueTransport>,
    ) -> Self {
        let subscription = transport.subscription().to_string();
        let gate = AckGate::new(transport, envelope.id.clone(), envelope.ack_id.clone());
        Self {
            envelope,
            binding,
            subscription,
            gate,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.envelope.id
    }

    pub fn message_type(&self) -> Option<&str> {
        self.envelope.message_type()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.envelope.attribute(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.envelope.body
    }

    pub fn binding(&self) -> &MessageBinding {
        &self.binding
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Acknowledge the message now. Removed from the subscription
    /// immediately and not redelivered even if processing fails later.
    pub async fn acknowledge(&self) -> Result<(), relay_queue::QueueError> {
        self.gate.acknowledge().await
    }

    /// Suppress the automatic acknowledge so the transport redelivers
    /// this message.
    pub fn request_retry(&self) {
        self.gate.request_retry();
    }

    pub fn ack_state(&self) -> crate::ack::AckState {
        self.gate.state()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Throttling pause applied after a tracked handler failure, so a
    /// persistently failing message cannot spin the loop hot.
    pub failure_pause: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            failure_pause: Duration::from_secs(5),
        }
    }
}

pub struct MessagePipeline {
    schemas: Arc<SchemaRegistry>,
    tracker: FailureTracker,
    config: PipelineConfig,
}

impl MessagePipeline {
    pub fn new(schemas: Arc<SchemaRegistry>, tracker: FailureTracker, config: PipelineConfig) -> Self {
        Self {
            schemas,
            tracker,
            config,
        }
    }

    /// Process one message to completion. Returns `Err` only for
    /// infrastructure failures; every business-level failure is handled
    /// here and the loop continues.
    pub async fn process(
        &self,
        request: &ProcessingRequest,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let Some(payload) = self.decode(request).await? else {
            return Ok(());
        };

        match handler.handle(payload, request).await {
            Ok(()) => {
                request
                    .acknowledge()
                    .await
                    .context("failed to acknowledge processed message")?;
                Ok(())
            }
            Err(HandlerError::Infrastructure(err)) => {
                error!(
                    message_id = %request.message_id(),
                    subscription = %request.subscription(),
                    error = format!("{err:#}"),
                    "Infrastructure connectivity failure, terminating worker"
                );
                Err(err.context("infrastructure connectivity failure"))
            }
            Err(HandlerError::Business(err)) => {
                self.track_failure(request, err).await?;
                sleep(self.config.failure_pause).await;
                Ok(())
            }
        }
    }

    /// Decode and validate the message body. Returns `None` when the
    /// message was consumed by an irrecoverable decode or validation
    /// failure (already acknowledged and logged).
    async fn decode(&self, request: &ProcessingRequest) -> Result<Option<Value>> {
        match request.binding().schema.as_deref() {
            // Raw mode: any valid JSON passes through to the handler.
            None => match serde_json::from_slice(request.body()) {
                Ok(payload) => Ok(Some(payload)),
                Err(err) => {
                    self.discard(request).await?;
                    error!(
                        message_id = %request.message_id(),
                        subscription = %request.subscription(),
                        error = %err,
                        "Message body is not valid JSON"
                    );
                    Ok(None)
                }
            },
            Some(schema_id) => {
                let Some(schema) = self.schemas.get(schema_id) else {
                    // Bindings are verified at startup; a missing schema
                    // here still must not leave the message spinning.
                    self.discard(request).await?;
                    error!(
                        message_id = %request.message_id(),
                        schema = %schema_id,
                        "Schema not registered, message discarded"
                    );
                    return Ok(None);
                };

                let payload = match schema.decode(request.body()) {
                    Ok(payload) => payload,
                    Err(err) => {
                        self.discard(request).await?;
                        error!(
                            message_id = %request.message_id(),
                            subscription = %request.subscription(),
                            schema = %schema_id,
                            error = %err,
                            "Message deserialization failed"
                        );
                        return Ok(None);
                    }
                };

                let violations = schema.validate(&payload);
                if !violations.is_empty() {
                    self.discard(request).await?;
                    let summary: Vec<String> =
                        violations.iter().map(ToString::to_string).collect();
                    error!(
                        message_id = %request.message_id(),
                        subscription = %request.subscription(),
                        schema = %schema_id,
                        violations = %summary.join("; "),
                        "Message validation failed"
                    );
                    return Ok(None);
                }

                Ok(Some(payload))
            }
        }
    }

    /// Acknowledge an irrecoverably broken message so it is never
    /// redelivered.
    async fn discard(&self, request: &ProcessingRequest) -> Result<()> {
        request
            .acknowledge()
            .await
            .context("failed to acknowledge undecodable message")
    }

    async fn track_failure(&self, request: &ProcessingRequest, err: anyhow::Error) -> Result<()> {
        let detail = FailureDetail {
            error: format!("{err:#}"),
            error_trace: format!("{err:?}"),
            message_type: request.message_type().map(String::from),
            body: String::from_utf8_lossy(request.body()).into_owned(),
        };

        let tries = self
            .tracker
            .record_failure(request.subscription(), request.message_id(), detail)
            .await
            .context("failure store write failed")?;

        if self.tracker.is_poison(tries) {
            warn!(
                message_id = %request.message_id(),
                subscription = %request.subscription(),
                tries,
                "Quarantining poison message"
            );
            request
                .acknowledge()
                .await
                .context("failed to acknowledge quarantined message")?;
        }

        error!(
            message_id = %request.message_id(),
            subscription = %request.subscription(),
            tries,
            error = format!("{err:#}"),
            "Failed to process message"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{FailureKey, InMemoryFailureStore};
    use crate::registry::DEFAULT_TYPE_TAG;
    use crate::schema::{SerdeSchema, Validate, Violation};
    use async_trait::async_trait;
    use relay_queue::InMemoryTransport;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }

    impl Validate for OrderCreated {
        fn validate(&self) -> Vec<Violation> {
            if self.id == 0 {
                vec![Violation::new("id", "must be positive")]
            } else {
                Vec::new()
            }
        }
    }

    enum Behavior {
        Succeed,
        FailBusiness,
        FailInfrastructure,
        RetryThenSucceed,
    }

    struct TestHandler {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl TestHandler {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageHandler for TestHandler {
        async fn handle(
            &self,
            _payload: Value,
            request: &ProcessingRequest,
        ) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::FailBusiness => {
                    Err(HandlerError::business(anyhow::anyhow!("order rejected")))
                }
                Behavior::FailInfrastructure => Err(HandlerError::infrastructure(
                    anyhow::anyhow!("no connection to the server"),
                )),
                Behavior::RetryThenSucceed => {
                    request.request_retry();
                    Ok(())
                }
            }
        }
    }

    struct Fixture {
        transport: Arc<InMemoryTransport>,
        store: Arc<InMemoryFailureStore>,
        pipeline: MessagePipeline,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(InMemoryTransport::new("projects/demo/subscriptions/orders"));
        let store = Arc::new(InMemoryFailureStore::new());
        let mut schemas = SchemaRegistry::new();
        schemas.register(
            "order-created",
            Arc::new(SerdeSchema::<OrderCreated>::new("order-created")),
        );
        let tracker = FailureTracker::new(store.clone(), 3);
        let pipeline = MessagePipeline::new(
            Arc::new(schemas),
            tracker,
            PipelineConfig {
                failure_pause: Duration::from_millis(1),
            },
        );
        Fixture {
            transport,
            store,
            pipeline,
        }
    }

    async fn pull_request(
        fixture: &Fixture,
        message_id: &str,
        message_type: Option<&str>,
        schema: Option<&str>,
        body: &str,
    ) -> ProcessingRequest {
        let mut attributes = HashMap::new();
        if let Some(message_type) = message_type {
            attributes.insert(
                relay_common::MESSAGE_TYPE_ATTRIBUTE.to_string(),
                message_type.to_string(),
            );
        }
        fixture.transport.publish(MessageEnvelope::new(
            message_id,
            body.as_bytes().to_vec(),
            attributes,
            "unassigned",
        ));
        let envelope = fixture.transport.pull(1).await.unwrap().pop().unwrap();
        let binding = MessageBinding {
            message_type: message_type.unwrap_or(DEFAULT_TYPE_TAG).to_string(),
            schema: schema.map(String::from),
            handler: "test".to_string(),
        };
        ProcessingRequest::new(envelope, binding, fixture.transport.clone())
    }

    #[tokio::test]
    async fn test_success_acks_once_and_writes_nothing() {
        let fixture = fixture();
        let handler = TestHandler::new(Behavior::Succeed);
        let request = pull_request(
            &fixture,
            "m-1",
            Some("OrderCreated"),
            Some("order-created"),
            r#"{"id":42}"#,
        )
        .await;

        fixture.pipeline.process(&request, handler.clone()).await.unwrap();

        assert_eq!(handler.call_count(), 1);
        assert_eq!(fixture.transport.ack_count(), 1);
        assert_eq!(fixture.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_json_in_raw_mode_is_discarded() {
        let fixture = fixture();
        let handler = TestHandler::new(Behavior::Succeed);
        let request = pull_request(&fixture, "m-1", None, None, "not-json").await;

        fixture.pipeline.process(&request, handler.clone()).await.unwrap();

        assert_eq!(handler.call_count(), 0);
        assert_eq!(fixture.transport.ack_count(), 1);
        assert_eq!(fixture.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_discarded() {
        let fixture = fixture();
        let handler = TestHandler::new(Behavior::Succeed);
        let request = pull_request(
            &fixture,
            "m-1",
            Some("OrderCreated"),
            Some("order-created"),
            "not-json",
        )
        .await;

        fixture.pipeline.process(&request, handler.clone()).await.unwrap();

        assert_eq!(handler.call_count(), 0);
        assert_eq!(fixture.transport.ack_count(), 1);
        assert_eq!(fixture.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_is_discarded() {
        let fixture = fixture();
        let handler = TestHandler::new(Behavior::Succeed);
        let request = pull_request(
            &fixture,
            "m-1",
            Some("OrderCreated"),
            Some("order-created"),
            r#"{"id":0}"#,
        )
        .await;

        fixture.pipeline.process(&request, handler.clone()).await.unwrap();

        assert_eq!(handler.call_count(), 0);
        assert_eq!(fixture.transport.ack_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_business_failure_is_tracked_and_left_unacked() {
        let fixture = fixture();
        let handler = TestHandler::new(Behavior::FailBusiness);
        let request = pull_request(
            &fixture,
            "m-1",
            Some("OrderCreated"),
            Some("order-created"),
            r#"{"id":42}"#,
        )
        .await;

        fixture.pipeline.process(&request, handler).await.unwrap();

        assert_eq!(fixture.transport.ack_count(), 0);
        let record = fixture
            .store
            .get(&FailureKey::new("orders", "m-1"))
            .unwrap();
        assert_eq!(record.tries, 1);
        assert!(record.error.contains("order rejected"));
        assert_eq!(record.message_type.as_deref(), Some("OrderCreated"));
        assert_eq!(record.body, r#"{"id":42}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_failure_quarantines_message() {
        let fixture = fixture();
        let handler = TestHandler::new(Behavior::FailBusiness);

        for attempt in 1..=3u32 {
            let request = pull_request(
                &fixture,
                "m-1",
                Some("OrderCreated"),
                Some("order-created"),
                r#"{"id":42}"#,
            )
            .await;
            fixture
                .pipeline
                .process(&request, handler.clone())
                .await
                .unwrap();

            if attempt < 3 {
                assert_eq!(fixture.transport.ack_count(), 0);
            }
        }

        // Third failure reaches the threshold: forced acknowledge,
        // record persists with the final try count.
        assert_eq!(fixture.transport.ack_count(), 1);
        let record = fixture
            .store
            .get(&FailureKey::new("orders", "m-1"))
            .unwrap();
        assert_eq!(record.tries, 3);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_propagates_without_tracking() {
        let fixture = fixture();
        let handler = TestHandler::new(Behavior::FailInfrastructure);
        let request = pull_request(
            &fixture,
            "m-1",
            Some("OrderCreated"),
            Some("order-created"),
            r#"{"id":42}"#,
        )
        .await;

        let err = fixture.pipeline.process(&request, handler).await.unwrap_err();
        assert!(format!("{err:#}").contains("infrastructure connectivity"));
        assert_eq!(fixture.transport.ack_count(), 0);
        assert_eq!(fixture.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_requested_retry_suppresses_ack() {
        let fixture = fixture();
        let handler = TestHandler::new(Behavior::RetryThenSucceed);
        let request = pull_request(
            &fixture,
            "m-1",
            Some("OrderCreated"),
            Some("order-created"),
            r#"{"id":42}"#,
        )
        .await;

        fixture.pipeline.process(&request, handler).await.unwrap();

        // Handler asked for redelivery: the success-path acknowledge is
        // a no-op and the transport never sees an ack.
        assert_eq!(fixture.transport.ack_count(), 0);
    }
}
