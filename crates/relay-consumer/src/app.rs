//! One-call consumer assembly.
//!
//! `ConsumerApp` collects the configuration, the handler and schema
//! registrations and the transport/store clients, verifies that every
//! configured binding resolves, and produces a ready-to-run
//! `Dispatcher`. All wiring is explicit: dependencies are passed in as
//! `Arc` handles, there is no process-wide container.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use relay_config::ConsumerConfig;
use relay_queue::QueueTransport;

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::failure::{FailureStore, FailureTracker};
use crate::handler::{DefaultIdleHandler, HandlerRegistry, IdleHandler, MessageHandler};
use crate::pipeline::{MessagePipeline, PipelineConfig};
use crate::registry::MessageTypeRegistry;
use crate::schema::{MessageSchema, SchemaRegistry};
use crate::signals::{self, ProcessSignals, SignalMonitor};

pub struct ConsumerApp {
    config: ConsumerConfig,
    handlers: HandlerRegistry,
    schemas: SchemaRegistry,
    idle_handlers: HashMap<String, Arc<dyn IdleHandler>>,
    transport: Option<Arc<dyn QueueTransport>>,
    store: Option<Arc<dyn FailureStore>>,
    signals: Option<Arc<dyn SignalMonitor>>,
}

impl ConsumerApp {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
            schemas: SchemaRegistry::new(),
            idle_handlers: HashMap::new(),
            transport: None,
            store: None,
            signals: None,
        }
    }

    pub fn register_handler(
        mut self,
        id: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.handlers.register(id, handler);
        self
    }

    pub fn register_schema(
        mut self,
        id: impl Into<String>,
        schema: Arc<dyn MessageSchema>,
    ) -> Self {
        self.schemas.register(id, schema);
        self
    }

    pub fn register_idle_handler(
        mut self,
        id: impl Into<String>,
        handler: Arc<dyn IdleHandler>,
    ) -> Self {
        self.idle_handlers.insert(id.into(), handler);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn QueueTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_failure_store(mut self, store: Arc<dyn FailureStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_signals(mut self, signals: Arc<dyn SignalMonitor>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Verify the configuration against the registrations and assemble
    /// the dispatcher. Fails fast: every configured handler, schema and
    /// idle-handler id must resolve before the first poll.
    pub fn build(self) -> Result<Dispatcher> {
        self.config.validate().context("invalid configuration")?;

        let registry = MessageTypeRegistry::from_config(&self.config.handlers)
            .context("invalid handler bindings")?;

        for binding in registry.bindings() {
            if !self.handlers.contains(&binding.handler) {
                bail!(
                    "handler '{}' bound to message type '{}' is not registered",
                    binding.handler,
                    binding.message_type
                );
            }
            if let Some(schema) = &binding.schema {
                if !self.schemas.contains(schema) {
                    bail!(
                        "schema '{}' bound to message type '{}' is not registered",
                        schema,
                        binding.message_type
                    );
                }
            }
        }

        let idle_handler: Arc<dyn IdleHandler> = match &self.config.idle_handler {
            Some(id) => self
                .idle_handlers
                .get(id)
                .cloned()
                .with_context(|| format!("idle handler '{id}' is not registered"))?,
            None => Arc::new(DefaultIdleHandler),
        };

        let transport = self
            .transport
            .context("no queue transport configured")?;
        let store = self.store.context("no failure store configured")?;
        let signals: Arc<dyn SignalMonitor> = match self.signals {
            Some(signals) => signals,
            None => ProcessSignals::new(),
        };

        let tracker = FailureTracker::new(store, self.config.quarantine_threshold);
        let pipeline = MessagePipeline::new(
            Arc::new(self.schemas),
            tracker,
            PipelineConfig {
                failure_pause: Duration::from_secs(self.config.failure_pause_secs),
            },
        );

        info!(
            subscription = %self.config.subscription,
            "Consumer assembled"
        );

        Ok(Dispatcher::new(
            transport,
            Arc::new(registry),
            Arc::new(self.handlers),
            idle_handler,
            signals,
            pipeline,
            DispatcherConfig {
                idle_delay: Duration::from_secs(self.config.idle_delay_secs),
            },
        ))
    }

    /// Build and run the consumer, wiring the process termination
    /// signal when no signal monitor was supplied.
    pub async fn run(mut self) -> Result<()> {
        if self.signals.is_none() {
            let process_signals = ProcessSignals::new();
            signals::spawn_termination_listener(Arc::clone(&process_signals));
            self.signals = Some(process_signals);
        }
        self.build()?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use crate::pipeline::ProcessingRequest;
    use async_trait::async_trait;
    use relay_config::HandlerBindingConfig;
    use relay_queue::InMemoryTransport;
    use serde_json::Value;

    struct NoopHandler;

    #[async_trait]
    impl crate::handler::MessageHandler for NoopHandler {
        async fn handle(
            &self,
            _payload: Value,
            _request: &ProcessingRequest,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            subscription: "orders".to_string(),
            handlers: vec![HandlerBindingConfig {
                message_type: Some("OrderCreated".to_string()),
                schema: None,
                handler: "orders".to_string(),
            }],
            ..ConsumerConfig::default()
        }
    }

    fn transport() -> Arc<InMemoryTransport> {
        Arc::new(InMemoryTransport::new("orders"))
    }

    #[test]
    fn test_build_with_all_registrations() {
        let app = ConsumerApp::new(config())
            .register_handler("orders", Arc::new(NoopHandler))
            .with_transport(transport())
            .with_failure_store(Arc::new(crate::failure::InMemoryFailureStore::new()));
        assert!(app.build().is_ok());
    }

    #[test]
    fn test_build_rejects_unregistered_handler() {
        let app = ConsumerApp::new(config())
            .with_transport(transport())
            .with_failure_store(Arc::new(crate::failure::InMemoryFailureStore::new()));
        let err = app.build().unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_build_rejects_unregistered_schema() {
        let mut config = config();
        config.handlers[0].schema = Some("order-created".to_string());
        let app = ConsumerApp::new(config)
            .register_handler("orders", Arc::new(NoopHandler))
            .with_transport(transport())
            .with_failure_store(Arc::new(crate::failure::InMemoryFailureStore::new()));
        let err = app.build().unwrap_err();
        assert!(err.to_string().contains("schema"));
    }

    #[test]
    fn test_build_rejects_unregistered_idle_handler() {
        let mut config = config();
        config.idle_handler = Some("reindex".to_string());
        let app = ConsumerApp::new(config)
            .register_handler("orders", Arc::new(NoopHandler))
            .with_transport(transport())
            .with_failure_store(Arc::new(crate::failure::InMemoryFailureStore::new()));
        let err = app.build().unwrap_err();
        assert!(err.to_string().contains("idle handler"));
    }

    #[test]
    fn test_build_rejects_empty_config() {
        let app = ConsumerApp::new(ConsumerConfig::default())
            .with_transport(transport())
            .with_failure_store(Arc::new(crate::failure::InMemoryFailureStore::new()));
        assert!(app.build().is_err());
    }
}
