//! Message-type registry.
//!
//! Maps a message-type tag to its handler binding. Built once at startup
//! from configuration and read-only afterwards. Lookup never fails: a
//! tag without a mapping (or a message without a tag at all) falls
//! through to the reserved `:default:` binding, which always exists.

use std::collections::HashMap;

use relay_config::{ConfigError, HandlerBindingConfig};

/// Reserved tag binding unmapped or untyped messages.
pub const DEFAULT_TYPE_TAG: &str = ":default:";

/// Reserved handler id resolving to the built-in unmapped-message
/// handler when no explicit default handler is configured.
pub const DEFAULT_HANDLER_ID: &str = ":default:";

/// Binding of one message-type tag to a payload schema and a handler.
#[derive(Debug, Clone)]
pub struct MessageBinding {
    pub message_type: String,
    /// Schema id to decode and validate against; `None` means the body
    /// is parsed as raw JSON with no schema.
    pub schema: Option<String>,
    pub handler: String,
}

#[derive(Debug)]
pub struct MessageTypeRegistry {
    bindings: HashMap<String, MessageBinding>,
}

impl MessageTypeRegistry {
    /// Build the registry from configured bindings.
    ///
    /// An entry without a `message_type` declares the default binding.
    /// If none does, a default binding is synthesized pointing at the
    /// built-in unmapped-message handler. Zero configured handlers is a
    /// startup error.
    pub fn from_config(handlers: &[HandlerBindingConfig]) -> Result<Self, ConfigError> {
        if handlers.is_empty() {
            return Err(ConfigError::ValidationError(
                "no message handlers defined".to_string(),
            ));
        }

        let mut bindings = HashMap::new();
        for handler in handlers {
            match &handler.message_type {
                Some(message_type) => {
                    bindings.insert(
                        message_type.clone(),
                        MessageBinding {
                            message_type: message_type.clone(),
                            schema: handler.schema.clone(),
                            handler: handler.handler.clone(),
                        },
                    );
                }
                None => {
                    bindings.insert(
                        DEFAULT_TYPE_TAG.to_string(),
                        MessageBinding {
                            message_type: DEFAULT_TYPE_TAG.to_string(),
                            schema: handler.schema.clone(),
                            handler: handler.handler.clone(),
                        },
                    );
                }
            }
        }

        bindings
            .entry(DEFAULT_TYPE_TAG.to_string())
            .or_insert_with(|| MessageBinding {
                message_type: DEFAULT_TYPE_TAG.to_string(),
                schema: None,
                handler: DEFAULT_HANDLER_ID.to_string(),
            });

        Ok(Self { bindings })
    }

    /// Resolve a message-type tag to its binding, falling through to the
    /// default binding for unknown or absent tags.
    pub fn resolve(&self, tag: Option<&str>) -> &MessageBinding {
        tag.and_then(|t| self.bindings.get(t))
            .unwrap_or_else(|| &self.bindings[DEFAULT_TYPE_TAG])
    }

    /// All bindings, for startup verification of handler and schema ids.
    pub fn bindings(&self) -> impl Iterator<Item = &MessageBinding> {
        self.bindings.values()
    }
}
