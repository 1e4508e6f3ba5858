//! Structured-mode CloudEvent envelopes carrying a protobuf payload.
//!
//! The payload travels base64-encoded in `data_base64`, and `dataschema`
//! names the descriptor set and message type as `<uri>#<Type>`. After
//! conversion the event carries the JSON in `data` instead.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pbdyn_core::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CloudEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) dataschema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) data_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<Value>,
    /// Every other attribute, kept as-is
    #[serde(flatten)]
    pub(crate) attributes: Map<String, Value>,
}

impl CloudEvent {
    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Source is not a JSON CloudEvent")
    }

    /// Decoded `data_base64`
    pub(crate) fn payload(&self) -> Result<Vec<u8>> {
        let Some(encoded) = self.data_base64.as_deref() else {
            if self.data.is_some() {
                bail!("Event carries 'data' but no 'data_base64'; expected a binary protobuf payload");
            }
            bail!("Event has no 'data_base64' attribute");
        };
        STANDARD
            .decode(encoded.trim())
            .context("'data_base64' is not valid base64")
    }

    /// Replaces the binary payload with its JSON form
    pub(crate) fn into_json_event(mut self, data: JsonObject) -> Self {
        self.data_base64 = None;
        self.data = Some(Value::Object(data));
        self.datacontenttype = Some(JSON_CONTENT_TYPE.to_string());
        self
    }
}
