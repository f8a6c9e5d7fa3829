//! In-memory queue transport for development and tests.
//!
//! Messages live in a pending deque; a pull moves them into an in-flight
//! map keyed by ack handle. `redeliver` pushes unacknowledged in-flight
//! deliveries back onto the queue with fresh ack handles, simulating
//! at-least-once redelivery after a visibility timeout.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

use crate::{QueueError, QueueTransport, Result};
use async_trait::async_trait;
use relay_common::MessageEnvelope;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<MessageEnvelope>,
    in_flight: HashMap<String, MessageEnvelope>,
    acked: Vec<String>,
}

pub struct InMemoryTransport {
    subscription: String,
    state: Mutex<QueueState>,
}

impl InMemoryTransport {
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Enqueue a message for delivery. The ack handle is assigned at
    /// publish time and replaced on every redelivery.
    pub fn publish(&self, mut envelope: MessageEnvelope) {
        envelope.ack_id = Uuid::new_v4().to_string();
        self.state.lock().pending.push_back(envelope);
    }

    /// Requeue all unacknowledged in-flight deliveries with fresh ack
    /// handles. Returns the number of messages redelivered.
    pub fn redeliver(&self) -> usize {
        let mut state = self.state.lock();
        let in_flight: Vec<MessageEnvelope> = state.in_flight.drain().map(|(_, m)| m).collect();
        let count = in_flight.len();
        for mut envelope in in_flight {
            envelope.ack_id = Uuid::new_v4().to_string();
            state.pending.push_back(envelope);
        }
        count
    }

    /// Message ids acknowledged so far, in ack order.
    pub fn acked_ids(&self) -> Vec<String> {
        self.state.lock().acked.clone()
    }

    pub fn ack_count(&self) -> usize {
        self.state.lock().acked.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    fn subscription(&self) -> &str {
        &self.subscription
    }

    async fn pull(&self, max_messages: u32) -> Result<Vec<MessageEnvelope>> {
        let mut state = self.state.lock();
        let mut messages = Vec::new();
        while messages.len() < max_messages as usize {
            let Some(envelope) = state.pending.pop_front() else {
                break;
            };
            state
                .in_flight
                .insert(envelope.ack_id.clone(), envelope.clone());
            messages.push(envelope);
        }
        if !messages.is_empty() {
            debug!(
                subscription = %self.subscription,
                count = messages.len(),
                "Pulled messages from in-memory queue"
            );
        }
        Ok(messages)
    }

    async fn acknowledge(&self, ack_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let envelope = state
            .in_flight
            .remove(ack_id)
            .ok_or_else(|| QueueError::UnknownAckHandle(ack_id.to_string()))?;
        state.acked.push(envelope.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn envelope(id: &str) -> MessageEnvelope {
        MessageEnvelope::new(id, &b"{}"[..], HashMap::new(), "unassigned")
    }

    #[tokio::test]
    async fn test_pull_returns_immediately_when_empty() {
        let transport = InMemoryTransport::new("test-sub");
        let messages = transport.pull(1).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_pull_and_acknowledge() {
        let transport = InMemoryTransport::new("test-sub");
        transport.publish(envelope("m-1"));

        let messages = transport.pull(1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m-1");

        transport.acknowledge(&messages[0].ack_id).await.unwrap();
        assert_eq!(transport.acked_ids(), vec!["m-1".to_string()]);

        // Acked messages are not redelivered
        assert_eq!(transport.redeliver(), 0);
        assert!(transport.pull(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_issues_fresh_ack_handle() {
        let transport = InMemoryTransport::new("test-sub");
        transport.publish(envelope("m-1"));

        let first = transport.pull(1).await.unwrap().pop().unwrap();
        assert_eq!(transport.redeliver(), 1);

        let second = transport.pull(1).await.unwrap().pop().unwrap();
        assert_eq!(second.id, first.id);
        assert_ne!(second.ack_id, first.ack_id);

        // The stale handle is no longer valid
        let err = transport.acknowledge(&first.ack_id).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownAckHandle(_)));
    }
}
