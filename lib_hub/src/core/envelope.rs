//! # Relay Envelope
//!
//! The JSON object publishers push onto the broker queue. The only field the
//! hub interprets is the target connection id; everything else is payload and
//! travels untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HubError;

/// Name of the envelope field carrying the target connection id.
pub const TARGET_FIELD: &str = "boa-conn";

/// # Envelope
///
/// A decoded queue item: the mandatory target plus the remaining fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Registry key of the destination connection.
    #[serde(rename = "boa-conn")]
    pub target: String,
    /// Every other top-level field of the envelope object.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Builds an envelope addressed to `target`.
    pub fn new(target: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            target: target.into(),
            payload,
        }
    }

    /// Decodes a raw queue item.
    ///
    /// # Errors
    /// `HubError::Decode` when the item is not a JSON object with a string
    /// `boa-conn` field, `HubError::EmptyTarget` when that field is empty.
    pub fn decode(raw: &str) -> Result<Self, HubError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        if envelope.target.is_empty() {
            return Err(HubError::EmptyTarget);
        }
        Ok(envelope)
    }

    /// Encodes the envelope as a single JSON object.
    pub fn encode(&self) -> Result<String, HubError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The frame sent to a client right after its connection is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Always `true`.
    pub connected: bool,
    /// The registry key the connection was stored under.
    #[serde(rename = "connId")]
    pub conn_id: String,
}

impl Acknowledgement {
    /// Acknowledgement for a newly registered connection.
    pub fn new(conn_id: impl Into<String>) -> Self {
        Self {
            connected: true,
            conn_id: conn_id.into(),
        }
    }

    /// The JSON text frame.
    pub fn to_frame(&self) -> Result<String, HubError> {
        Ok(serde_json::to_string(self)?)
    }
}
