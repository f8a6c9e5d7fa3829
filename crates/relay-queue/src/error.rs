use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown ack handle: {0}")]
    UnknownAckHandle(String),

    #[error("AWS SQS error: {0}")]
    Sqs(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
