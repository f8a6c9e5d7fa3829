//! Relay worker.
//!
//! Polls a subscription and dispatches messages to registered handlers
//! with bounded retry and quarantine for poison messages.
//!
//! Configuration comes from a TOML file (see `relay-config` for search
//! paths) plus environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RELAY_CONFIG` | - | Explicit config file path |
//! | `RELAY_SUBSCRIPTION` | - | Subscription override |
//! | `RELAY_QUEUE_TYPE` | `memory` | Queue transport: `memory` or `sqs` |
//! | `RELAY_SQS_QUEUE_URL` | - | SQS queue URL (required for `sqs`) |
//! | `RELAY_STORE_TYPE` | `memory` | Failure store: `memory` or `mongo` |
//! | `RELAY_MONGO_URI` | - | MongoDB URI (required for `mongo`) |
//! | `RELAY_MONGO_DB` | `relay` | MongoDB database name |
//! | `LOG_FORMAT` | text | `json` for structured output |
//! | `RUST_LOG` | `info` | Log level filter |

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use relay_config::{ConfigLoader, ConsumerConfig};
use relay_consumer::mongo::MongoFailureStore;
use relay_consumer::{
    ConsumerApp, FailureStore, HandlerError, InMemoryFailureStore, MessageHandler,
    ProcessingRequest,
};
use relay_queue::sqs::SqsTransport;
use relay_queue::{InMemoryTransport, QueueTransport};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} environment variable is required", key))
}

/// Built-in handler that logs each message it receives. Useful as a
/// binding target while wiring up a new subscription.
struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(
        &self,
        payload: Value,
        request: &ProcessingRequest,
    ) -> Result<(), HandlerError> {
        info!(
            message_id = %request.message_id(),
            message_type = request.message_type().unwrap_or("<none>"),
            payload = %payload,
            "Received message"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    relay_common::logging::init_logging("relay-worker");

    info!("Starting Relay worker");

    let config = ConfigLoader::new().load()?;
    config.validate()?;

    let transport = create_transport(&config).await?;
    let store = create_failure_store().await?;

    ConsumerApp::new(config)
        .register_handler("log", Arc::new(LogHandler))
        .with_transport(transport)
        .with_failure_store(store)
        .run()
        .await
}

async fn create_transport(config: &ConsumerConfig) -> Result<Arc<dyn QueueTransport>> {
    let queue_type = env_or("RELAY_QUEUE_TYPE", "memory");
    match queue_type.as_str() {
        "sqs" => {
            let queue_url = env_required("RELAY_SQS_QUEUE_URL")?;
            let aws_config =
                aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let client = aws_sdk_sqs::Client::new(&aws_config);
            info!(queue_url = %queue_url, "Using SQS transport");
            Ok(Arc::new(SqsTransport::new(
                client,
                queue_url,
                config.subscription.clone(),
            )))
        }
        "memory" => {
            info!("Using in-memory transport");
            Ok(Arc::new(InMemoryTransport::new(config.subscription.clone())))
        }
        other => anyhow::bail!("Unknown queue type: {}", other),
    }
}

async fn create_failure_store() -> Result<Arc<dyn FailureStore>> {
    let store_type = env_or("RELAY_STORE_TYPE", "memory");
    match store_type.as_str() {
        "mongo" => {
            let uri = env_required("RELAY_MONGO_URI")?;
            let db_name = env_or("RELAY_MONGO_DB", "relay");
            let client = mongodb::Client::with_uri_str(&uri).await?;
            let store = MongoFailureStore::new(client, &db_name);
            store.init_indexes().await?;
            info!(database = %db_name, "Using MongoDB failure store");
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("Using in-memory failure store");
            Ok(Arc::new(InMemoryFailureStore::new()))
        }
        other => anyhow::bail!("Unknown failure store type: {}", other),
    }
}
