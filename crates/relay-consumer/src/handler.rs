//! Handler traits and registry.
//!
//! Handlers are capability objects resolved by identifier, not by type:
//! anything exposing "handle decoded payload, may fail" can be bound to
//! a message type. Failures carry their own classification so the
//! pipeline can tell a retryable business error from a fatal loss of
//! infrastructure connectivity without inspecting error text.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use crate::pipeline::ProcessingRequest;
use crate::registry::DEFAULT_HANDLER_ID;

#[derive(Error, Debug)]
pub enum HandlerError {
    /// Recoverable failure: the message is tracked and left for
    /// redelivery until the quarantine threshold is reached.
    #[error("business error: {0:#}")]
    Business(anyhow::Error),

    /// Loss of connectivity to a backing store. Fatal to the whole
    /// process; supervision restarts the worker from a clean state.
    #[error("infrastructure connectivity error: {0:#}")]
    Infrastructure(anyhow::Error),
}

impl HandlerError {
    pub fn business(err: impl Into<anyhow::Error>) -> Self {
        Self::Business(err.into())
    }

    pub fn infrastructure(err: impl Into<anyhow::Error>) -> Self {
        Self::Infrastructure(err.into())
    }
}

/// A message handler bound to one or more message types.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Value, request: &ProcessingRequest)
        -> Result<(), HandlerError>;
}

/// Hook invoked when a poll finds no message. Returning `true` means
/// useful work was done and the loop should poll again immediately
/// instead of sleeping through the idle delay.
#[async_trait]
pub trait IdleHandler: Send + Sync {
    async fn on_idle(&self) -> bool;
}

/// Idle handler that does nothing, letting the loop back off.
pub struct DefaultIdleHandler;

#[async_trait]
impl IdleHandler for DefaultIdleHandler {
    async fn on_idle(&self) -> bool {
        false
    }
}

/// Fallback handler for messages whose type has no configured binding.
/// Logs the message so unmapped traffic is visible, then lets the
/// pipeline acknowledge it.
pub struct DefaultMessageHandler;

#[async_trait]
impl MessageHandler for DefaultMessageHandler {
    async fn handle(
        &self,
        payload: Value,
        request: &ProcessingRequest,
    ) -> Result<(), HandlerError> {
        error!(
            message_id = %request.message_id(),
            message_type = request.message_type().unwrap_or("<none>"),
            payload = %payload,
            "Unmapped message received"
        );
        Ok(())
    }
}

/// Immutable id → handler lookup, populated before the loop starts.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    default_handler: Arc<dyn MessageHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: Arc::new(DefaultMessageHandler),
        }
    }

    pub fn register(&mut self, id: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let id = id.into();
        debug!(handler = %id, "Registered message handler");
        self.handlers.insert(id, handler);
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn MessageHandler>> {
        if id == DEFAULT_HANDLER_ID {
            return Some(Arc::clone(&self.default_handler));
        }
        self.handlers.get(id).map(Arc::clone)
    }

    /// Resolve a handler id, falling back to the default handler.
    /// Bindings are verified at startup, so a miss here indicates a
    /// registration removed at runtime; it is logged rather than fatal.
    pub fn resolve_or_default(&self, id: &str) -> Arc<dyn MessageHandler> {
        match self.resolve(id) {
            Some(handler) => handler,
            None => {
                error!(handler = %id, "Handler not registered, using default");
                Arc::clone(&self.default_handler)
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        id == DEFAULT_HANDLER_ID || self.handlers.contains_key(id)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
