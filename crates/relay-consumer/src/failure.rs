//! Failure tracking.
//!
//! Every recoverable processing failure is recorded in a durable store
//! keyed by `(subscription short-name, message id)`. The record carries
//! a full diagnostic snapshot on first failure and a try counter that
//! is bumped on each redelivery; once the counter reaches the
//! quarantine threshold the message is forcibly acknowledged and never
//! redelivered, while the record stays behind as a permanent audit
//! trail. No transactional read-modify-write: a lost update merely
//! under-counts retries, accepted for a single-consumer deployment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Schema version tag written into every record for forward
/// compatibility of stored diagnostics.
pub const RECORD_VERSION: i32 = 2;

/// Fields the backing store must exclude from search indexing: large
/// or sensitive diagnostic payloads.
pub const UNINDEXED_FIELDS: &[&str] = &["error", "error_trace", "body"];

#[derive(Error, Debug)]
pub enum StoreError {
    /// Lost connection to the durable store. Treated as an
    /// infrastructure failure: fatal to the process.
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store error: {0}")]
    Backend(String),
}

/// Key of a failure record: subscription short-name plus the logical
/// message id (stable across redeliveries).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailureKey {
    pub subscription: String,
    pub message_id: String,
}

impl FailureKey {
    pub fn new(subscription: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            message_id: message_id.into(),
        }
    }

    /// Stable entity id for key-value stores.
    pub fn entity_id(&self) -> String {
        format!("{}:{}", self.message_id, self.subscription)
    }
}

#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub key: FailureKey,
    pub tries: u32,
    pub error: String,
    pub error_trace: String,
    pub message_type: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl FailureRecord {
    fn first_failure(
        key: FailureKey,
        error: String,
        error_trace: String,
        message_type: Option<String>,
        body: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            tries: 1,
            error,
            error_trace,
            message_type,
            body,
            created_at: now,
            updated_at: now,
            version: RECORD_VERSION,
        }
    }
}

/// Durable key-value store for failure records.
///
/// Implementations must not index the fields named by
/// [`UNINDEXED_FIELDS`].
#[async_trait]
pub trait FailureStore: Send + Sync {
    async fn lookup(&self, key: &FailureKey) -> Result<Option<FailureRecord>, StoreError>;
    async fn insert(&self, record: &FailureRecord) -> Result<(), StoreError>;
    async fn update(&self, record: &FailureRecord) -> Result<(), StoreError>;
}

/// In-memory failure store for development and tests.
#[derive(Default)]
pub struct InMemoryFailureStore {
    records: RwLock<HashMap<String, FailureRecord>>,
}

impl InMemoryFailureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn get(&self, key: &FailureKey) -> Option<FailureRecord> {
        self.records.read().get(&key.entity_id()).cloned()
    }
}

#[async_trait]
impl FailureStore for InMemoryFailureStore {
    async fn lookup(&self, key: &FailureKey) -> Result<Option<FailureRecord>, StoreError> {
        Ok(self.records.read().get(&key.entity_id()).cloned())
    }

    async fn insert(&self, record: &FailureRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.key.entity_id(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &FailureRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.key.entity_id(), record.clone());
        Ok(())
    }
}

/// Diagnostic detail captured alongside a failure.
#[derive(Debug, Clone)]
pub struct FailureDetail {
    pub error: String,
    pub error_trace: String,
    pub message_type: Option<String>,
    pub body: String,
}

/// Records failures and decides when a message has become poison.
pub struct FailureTracker {
    store: std::sync::Arc<dyn FailureStore>,
    quarantine_threshold: u32,
}

impl FailureTracker {
    pub fn new(store: std::sync::Arc<dyn FailureStore>, quarantine_threshold: u32) -> Self {
        Self {
            store,
            quarantine_threshold,
        }
    }

    /// Record one failure for `(subscription, message_id)` and return
    /// the resulting try count. Inserts a full diagnostic snapshot on
    /// the first failure; later failures bump the counter and refresh
    /// the update timestamp.
    pub async fn record_failure(
        &self,
        subscription: &str,
        message_id: &str,
        detail: FailureDetail,
    ) -> Result<u32, StoreError> {
        let key = FailureKey::new(short_subscription_name(subscription), message_id);

        let tries = match self.store.lookup(&key).await? {
            Some(mut record) => {
                record.tries += 1;
                record.updated_at = Utc::now();
                self.store.update(&record).await?;
                record.tries
            }
            None => {
                let record = FailureRecord::first_failure(
                    key.clone(),
                    detail.error,
                    detail.error_trace,
                    detail.message_type,
                    detail.body,
                );
                self.store.insert(&record).await?;
                1
            }
        };

        debug!(
            subscription = %key.subscription,
            message_id = %key.message_id,
            tries,
            "Recorded message failure"
        );

        Ok(tries)
    }

    /// Whether a message with this try count must be quarantined.
    pub fn is_poison(&self, tries: u32) -> bool {
        tries >= self.quarantine_threshold
    }
}

/// The part of a subscription name after the last `/`, so fully
/// qualified names and short names key the same records.
pub fn short_subscription_name(subscription: &str) -> &str {
    subscription
        .rsplit('/')
        .next()
        .unwrap_or(subscription)
}
