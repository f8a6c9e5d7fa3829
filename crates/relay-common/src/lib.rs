use bytes::Bytes;
use std::collections::HashMap;

pub mod logging;

/// Attribute key carrying the message-type tag on inbound messages.
pub const MESSAGE_TYPE_ATTRIBUTE: &str = "message-type";

/// One inbound unit of work pulled from a subscription.
///
/// The `id` is unique per delivery attempt but stable across redeliveries
/// of the same logical message. The `ack_id` is usable exactly once per
/// delivery; a redelivered copy arrives as a new envelope with a fresh
/// `ack_id` and the same `id`.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub id: String,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub ack_id: String,
}

impl MessageEnvelope {
    pub fn new(
        id: impl Into<String>,
        body: impl Into<Bytes>,
        attributes: HashMap<String, String>,
        ack_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            attributes,
            ack_id: ack_id.into(),
        }
    }

    /// Look up a string attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// The message-type tag, if the publisher set one.
    pub fn message_type(&self) -> Option<&str> {
        self.attribute(MESSAGE_TYPE_ATTRIBUTE)
    }
}
