//! MongoDB failure store.
//!
//! One document per `(subscription, message id)` key, `_id` set to the
//! key's entity id. Only `created_at` is indexed; the diagnostic fields
//! (`error`, `error_trace`, `body`) stay unindexed as the record
//! contract requires.

use async_trait::async_trait;
use chrono::DateTime;
use mongodb::bson::{doc, Document};
use mongodb::error::ErrorKind;
use mongodb::{Client, Collection, IndexModel};
use tracing::{debug, info};

use crate::failure::{FailureKey, FailureRecord, FailureStore, StoreError, RECORD_VERSION};

const DEFAULT_COLLECTION: &str = "failed_messages";

pub struct MongoFailureStore {
    collection: Collection<Document>,
}

impl MongoFailureStore {
    pub fn new(client: Client, db_name: &str) -> Self {
        Self::with_collection(client, db_name, DEFAULT_COLLECTION)
    }

    pub fn with_collection(client: Client, db_name: &str, collection: &str) -> Self {
        Self {
            collection: client.database(db_name).collection(collection),
        }
    }

    /// Create the lookup index. Diagnostic fields are deliberately left
    /// out of every index.
    pub async fn init_indexes(&self) -> Result<(), StoreError> {
        let index = IndexModel::builder().keys(doc! { "created_at": 1 }).build();
        self.collection
            .create_index(index)
            .await
            .map_err(map_mongo_error)?;
        info!(collection = %self.collection.name(), "Failure store indexes ready");
        Ok(())
    }

    fn to_doc(record: &FailureRecord) -> Document {
        doc! {
            "_id": record.key.entity_id(),
            "subscription": &record.key.subscription,
            "message_id": &record.key.message_id,
            "tries": record.tries as i32,
            "error": &record.error,
            "error_trace": &record.error_trace,
            "message_type": record.message_type.as_deref(),
            "body": &record.body,
            "created_at": record.created_at.timestamp_millis(),
            "updated_at": record.updated_at.timestamp_millis(),
            "version": record.version,
        }
    }

    fn parse_doc(doc: &Document) -> Result<FailureRecord, StoreError> {
        let created_at = doc
            .get_i64("created_at")
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| StoreError::Backend("invalid created_at timestamp".to_string()))?;
        let updated_at = doc
            .get_i64("updated_at")
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(created_at);

        Ok(FailureRecord {
            key: FailureKey::new(
                doc.get_str("subscription")
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
                doc.get_str("message_id")
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
            ),
            tries: doc.get_i32("tries").unwrap_or(1) as u32,
            error: doc.get_str("error").unwrap_or_default().to_string(),
            error_trace: doc.get_str("error_trace").unwrap_or_default().to_string(),
            message_type: doc.get_str("message_type").ok().map(String::from),
            body: doc.get_str("body").unwrap_or_default().to_string(),
            created_at,
            updated_at,
            version: doc.get_i32("version").unwrap_or(RECORD_VERSION),
        })
    }
}

#[async_trait]
impl FailureStore for MongoFailureStore {
    async fn lookup(&self, key: &FailureKey) -> Result<Option<FailureRecord>, StoreError> {
        let filter = doc! { "_id": key.entity_id() };
        let found = self
            .collection
            .find_one(filter)
            .await
            .map_err(map_mongo_error)?;
        found.as_ref().map(Self::parse_doc).transpose()
    }

    async fn insert(&self, record: &FailureRecord) -> Result<(), StoreError> {
        self.collection
            .insert_one(Self::to_doc(record))
            .await
            .map_err(map_mongo_error)?;
        debug!(
            message_id = %record.key.message_id,
            subscription = %record.key.subscription,
            "Inserted failure record"
        );
        Ok(())
    }

    async fn update(&self, record: &FailureRecord) -> Result<(), StoreError> {
        let filter = doc! { "_id": record.key.entity_id() };
        let update = doc! {
            "$set": {
                "tries": record.tries as i32,
                "updated_at": record.updated_at.timestamp_millis(),
            }
        };
        self.collection
            .update_one(filter, update)
            .await
            .map_err(map_mongo_error)?;
        debug!(
            message_id = %record.key.message_id,
            subscription = %record.key.subscription,
            tries = record.tries,
            "Updated failure record"
        );
        Ok(())
    }
}

/// Connectivity loss maps to the fatal `Connection` class; everything
/// else stays a backend error.
fn map_mongo_error(err: mongodb::error::Error) -> StoreError {
    match *err.kind {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } => {
            StoreError::Connection(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}
