use async_trait::async_trait;
use relay_common::MessageEnvelope;

pub mod error;
pub mod memory;

#[cfg(feature = "sqs")]
pub mod sqs;

pub use error::QueueError;
pub use memory::InMemoryTransport;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Trait for pulling and acknowledging messages on a subscription.
///
/// The transport is at-least-once: a message that is never acknowledged
/// will eventually be redelivered as a new envelope with the same logical
/// message id and a fresh ack handle.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Name of the subscription this transport is bound to.
    fn subscription(&self) -> &str;

    /// Pull up to `max_messages` available messages.
    ///
    /// Must return immediately whether or not a message is available;
    /// callers drive their own idle backoff.
    async fn pull(&self, max_messages: u32) -> Result<Vec<MessageEnvelope>>;

    /// Acknowledge a delivery, removing it from the subscription.
    ///
    /// Valid only for an `ack_id` from a live delivery attempt.
    async fn acknowledge(&self, ack_id: &str) -> Result<()>;
}
