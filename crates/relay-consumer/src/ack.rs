//! Per-message acknowledgment gate.
//!
//! Guards exactly-once local acknowledgment against an at-least-once
//! transport. The state machine has three states: `Pending`,
//! `Acknowledged` (terminal) and `RetryRequested` (terminal with
//! respect to acknowledgment: further acknowledge calls are ignored so
//! the transport redelivers the message naturally).

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use relay_queue::{QueueError, QueueTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Acknowledged,
    RetryRequested,
}

pub struct AckGate {
    transport: Arc<dyn QueueTransport>,
    message_id: String,
    ack_id: String,
    state: Mutex<AckState>,
}

impl AckGate {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        message_id: impl Into<String>,
        ack_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            message_id: message_id.into(),
            ack_id: ack_id.into(),
            state: Mutex::new(AckState::Pending),
        }
    }

    /// Acknowledge the message. Idempotent: once acknowledged, further
    /// calls return without contacting the transport. After
    /// `request_retry` the acknowledge is skipped entirely so the
    /// message stays eligible for redelivery.
    pub async fn acknowledge(&self) -> Result<(), QueueError> {
        {
            let state = self.state.lock();
            match *state {
                AckState::Acknowledged => return Ok(()),
                AckState::RetryRequested => {
                    info!(
                        message_id = %self.message_id,
                        "Ignoring acknowledge for message held for retry"
                    );
                    return Ok(());
                }
                AckState::Pending => {}
            }
        }

        self.transport.acknowledge(&self.ack_id).await?;
        *self.state.lock() = AckState::Acknowledged;
        info!(message_id = %self.message_id, "Acknowledged message");
        Ok(())
    }

    /// Prevent the automatic acknowledge on successful processing so the
    /// transport redelivers the message. Calling this after the message
    /// was already acknowledged is a caller error: the acknowledgment
    /// cannot be undone, so it is logged and the state stays terminal.
    pub fn request_retry(&self) {
        let mut state = self.state.lock();
        if *state == AckState::Acknowledged {
            warn!(
                message_id = %self.message_id,
                "request_retry() called after acknowledge(); delivery outcome unchanged"
            );
            return;
        }
        *state = AckState::RetryRequested;
    }

    pub fn state(&self) -> AckState {
        *self.state.lock()
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_common::MessageEnvelope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport stub that only counts acknowledge calls.
    struct CountingTransport {
        acks: AtomicUsize,
    }

    impl CountingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                acks: AtomicUsize::new(0),
            })
        }

        fn ack_count(&self) -> usize {
            self.acks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueueTransport for CountingTransport {
        fn subscription(&self) -> &str {
            "test-sub"
        }

        async fn pull(&self, _max_messages: u32) -> relay_queue::Result<Vec<MessageEnvelope>> {
            Ok(Vec::new())
        }

        async fn acknowledge(&self, _ack_id: &str) -> relay_queue::Result<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_double_acknowledge_hits_transport_once() {
        let transport = CountingTransport::new();
        let gate = AckGate::new(transport.clone(), "m-1", "ack-1");

        gate.acknowledge().await.unwrap();
        gate.acknowledge().await.unwrap();

        assert_eq!(transport.ack_count(), 1);
        assert_eq!(gate.state(), AckState::Acknowledged);
    }

    #[tokio::test]
    async fn test_retry_before_acknowledge_suppresses_transport_ack() {
        let transport = CountingTransport::new();
        let gate = AckGate::new(transport.clone(), "m-1", "ack-1");

        gate.request_retry();
        gate.acknowledge().await.unwrap();
        gate.acknowledge().await.unwrap();

        assert_eq!(transport.ack_count(), 0);
        assert_eq!(gate.state(), AckState::RetryRequested);
    }

    #[tokio::test]
    async fn test_retry_after_acknowledge_does_not_change_state() {
        let transport = CountingTransport::new();
        let gate = AckGate::new(transport.clone(), "m-1", "ack-1");

        gate.acknowledge().await.unwrap();
        gate.request_retry();

        assert_eq!(gate.state(), AckState::Acknowledged);
        assert_eq!(transport.ack_count(), 1);
    }
}
