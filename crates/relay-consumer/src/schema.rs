//! Payload schema boundary.
//!
//! A `MessageSchema` deserializes a message body and reports validation
//! violations; the pipeline treats both kinds of failure as
//! irrecoverable for the message. Schemas are registered by id at
//! startup; bindings reference them by that id.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Message body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Body does not match schema {schema}: {detail}")]
    Schema { schema: String, detail: String },
}

/// A single validation violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Decode-and-validate contract for one payload schema.
pub trait MessageSchema: Send + Sync {
    /// Deserialize the raw body. A failure here is irrecoverable for
    /// the message.
    fn decode(&self, body: &[u8]) -> Result<Value, DecodeError>;

    /// Validate a decoded payload. An empty list means valid.
    fn validate(&self, payload: &Value) -> Vec<Violation>;
}

/// Semantic validation hook for typed payloads decoded by
/// [`SerdeSchema`]. The serde round trip already enforces structure
/// (required fields, types), so the default is "no further checks".
pub trait Validate {
    fn validate(&self) -> Vec<Violation> {
        Vec::new()
    }
}

/// Schema adapter for any serde-decodable payload type. Decoding parses
/// the body into `T` (enforcing the structural schema) and hands the
/// handler the JSON form; validation re-runs `T`'s semantic checks.
pub struct SerdeSchema<T> {
    name: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> SerdeSchema<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _payload: PhantomData,
        }
    }
}

impl<T> MessageSchema for SerdeSchema<T>
where
    T: DeserializeOwned + Serialize + Validate + Send + Sync,
{
    fn decode(&self, body: &[u8]) -> Result<Value, DecodeError> {
        let payload: T = serde_json::from_slice(body).map_err(|e| DecodeError::Schema {
            schema: self.name.clone(),
            detail: e.to_string(),
        })?;
        Ok(serde_json::to_value(payload)?)
    }

    fn validate(&self, payload: &Value) -> Vec<Violation> {
        match serde_json::from_value::<T>(payload.clone()) {
            Ok(typed) => typed.validate(),
            Err(e) => vec![Violation::new("$", e.to_string())],
        }
    }
}

/// Immutable id → schema lookup, populated before the loop starts.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<dyn MessageSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, schema: Arc<dyn MessageSchema>) {
        self.schemas.insert(id.into(), schema);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn MessageSchema>> {
        self.schemas.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }
}
