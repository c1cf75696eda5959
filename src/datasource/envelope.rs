//! JSON envelopes exchanged between the planner and the data sources

use crate::error::{EventError, Result};
use crate::types::StreamEvent;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::BTreeMap;
use std::hash::Hasher;

/// Field result of a successful publish
pub const PUBLISH_SUCCESS: &[u8] = br#"{"success": true}"#;

/// Field result of a failed publish
pub const PUBLISH_FAILURE: &[u8] = br#"{"success": false}"#;

/// Event section of a publish input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeEvent {
    /// Rendered event payload, kept verbatim
    pub data: Box<RawValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl EnvelopeEvent {
    pub fn to_stream_event(&self) -> StreamEvent {
        StreamEvent::new(Bytes::copy_from_slice(self.data.get().as_bytes()))
    }
}

/// Render the input template of a publish or request field
///
/// The event data may still contain `$$N$$` placeholders that only become
/// valid JSON once the engine renders variables, so the envelope is built as
/// text. The output is identical for identical inputs.
pub fn render_publish_input(
    address_key: &str,
    address: &str,
    event_data: &[u8],
    provider_id: &str,
    root_field_name: &str,
) -> Result<String> {
    let data = std::str::from_utf8(event_data)
        .map_err(|e| EventError::Template(format!("event data is not UTF-8: {}", e)))?;

    Ok(format!(
        r#"{{"{}":{}, "event": {{"data": {}}}, "providerId":{}, "rootFieldName":{}}}"#,
        address_key,
        serde_json::to_string(address)?,
        data,
        serde_json::to_string(provider_id)?,
        serde_json::to_string(root_field_name)?,
    ))
}

/// Feed the raw JSON of `keys` from `input` into `hasher`, in order
pub fn write_unique_request_id(input: &[u8], keys: &[&str], hasher: &mut dyn Hasher) -> Result<()> {
    let value: serde_json::Value = serde_json::from_slice(input)?;
    for key in keys {
        let field = value
            .get(*key)
            .ok_or_else(|| EventError::KeyPathNotFound((*key).to_string()))?;
        hasher.write(&serde_json::to_vec(field)?);
    }
    Ok(())
}
