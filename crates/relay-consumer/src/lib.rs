//! Relay consumer core.
//!
//! A single-worker poll loop over an at-least-once queue transport.
//! Each pulled message is routed by its `message-type` attribute to a
//! registered handler; the processing pipeline decides, for every
//! outcome, whether the message is acknowledged now, left for
//! redelivery, or quarantined after repeated failures.

pub mod ack;
pub mod app;
pub mod dispatcher;
pub mod failure;
pub mod handler;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod signals;

#[cfg(feature = "mongo")]
pub mod mongo;

pub use ack::{AckGate, AckState};
pub use app::ConsumerApp;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use failure::{
    FailureKey, FailureRecord, FailureStore, FailureTracker, InMemoryFailureStore, StoreError,
};
pub use handler::{
    DefaultIdleHandler, DefaultMessageHandler, HandlerError, HandlerRegistry, IdleHandler,
    MessageHandler,
};
pub use pipeline::{MessagePipeline, PipelineConfig, ProcessingRequest};
pub use registry::{MessageBinding, MessageTypeRegistry, DEFAULT_HANDLER_ID, DEFAULT_TYPE_TAG};
pub use schema::{DecodeError, MessageSchema, SchemaRegistry, SerdeSchema, Validate, Violation};
pub use signals::{ProcessSignals, SignalMonitor};
