//! Consumer poll loop.
//!
//! Pulls at most one message per iteration, routes it through the type
//! registry and hands it to the processing pipeline. Empty polls invoke
//! the idle hook; the loop only sleeps when the hook reports it did no
//! useful work. The shutdown flag is polled once per iteration at the
//! top, so a message already pulled always runs to completion before
//! the loop exits.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use relay_queue::QueueTransport;

use crate::handler::{HandlerRegistry, IdleHandler};
use crate::pipeline::{MessagePipeline, ProcessingRequest};
use crate::registry::MessageTypeRegistry;
use crate::signals::SignalMonitor;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Backoff between polls after an idle pass that did no work.
    pub idle_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_secs(3),
        }
    }
}

pub struct Dispatcher {
    transport: Arc<dyn QueueTransport>,
    registry: Arc<MessageTypeRegistry>,
    handlers: Arc<HandlerRegistry>,
    idle_handler: Arc<dyn IdleHandler>,
    signals: Arc<dyn SignalMonitor>,
    pipeline: MessagePipeline,
    config: DispatcherConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        registry: Arc<MessageTypeRegistry>,
        handlers: Arc<HandlerRegistry>,
        idle_handler: Arc<dyn IdleHandler>,
        signals: Arc<dyn SignalMonitor>,
        pipeline: MessagePipeline,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            handlers,
            idle_handler,
            signals,
            pipeline,
            config,
        }
    }

    /// Run the poll loop until shutdown is requested or an
    /// infrastructure failure escapes the pipeline.
    pub async fn run(&self) -> Result<()> {
        info!(
            subscription = %self.transport.subscription(),
            "Consumer starts polling"
        );

        loop {
            if self.signals.shutdown_requested() {
                info!("Performing graceful shutdown on termination signal");
                return Ok(());
            }

            let mut messages = self
                .transport
                .pull(1)
                .await
                .context("failed to pull from subscription")?;

            let Some(envelope) = messages.pop() else {
                self.signals.report_liveness();
                if !self.idle_handler.on_idle().await {
                    sleep(self.config.idle_delay).await;
                }
                continue;
            };

            info!(message_id = %envelope.id, "Processing message");

            let binding = self.registry.resolve(envelope.message_type()).clone();
            let handler = self.handlers.resolve_or_default(&binding.handler);
            let request =
                ProcessingRequest::new(envelope, binding, Arc::clone(&self.transport));

            self.pipeline.process(&request, handler).await?;

            info!(message_id = %request.message_id(), "Finished processing message");
            self.signals.report_liveness();
        }
    }
}
