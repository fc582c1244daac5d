use base64::{prelude::BASE64_STANDARD, Engine};
use bytes::Bytes;
use serde::Serialize;

use crate::{
    config::MessageFormat,
    error::{Result, SerializationSnafu, SinkError},
    record::Record,
};

/// Converts a record into the bytes published downstream.
///
/// Formats are opaque to the pipeline core; implementations own the encoding
/// rules. Serialization failures propagate synchronously out of `write`.
pub trait Serializer: Send + Sync {
    fn serialize(&self, record: &dyn Record, format: MessageFormat) -> Result<Bytes>;
}

/// Serializer covering the raw-payload and JSON envelope formats.
///
/// The expand-value format falls back to the plain JSON envelope here since
/// opaque payloads carry no value schema to expand.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSerializer;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonEnvelope<'a> {
    payload_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_id: Option<u64>,
}

impl Serializer for DefaultSerializer {
    fn serialize(&self, record: &dyn Record, format: MessageFormat) -> Result<Bytes> {
        match format {
            MessageFormat::RawPayload => Ok(Bytes::copy_from_slice(record.payload())),
            MessageFormat::FullMessageJson | MessageFormat::FullMessageJsonExpandValue => {
                let envelope = JsonEnvelope {
                    payload_base64: BASE64_STANDARD.encode(record.payload()),
                    key: record.key(),
                    topic: record.topic(),
                    sequence_id: record.sequence_id(),
                };
                let encoded = serde_json::to_vec(&envelope).map_err(|err| {
                    SinkError::Serialization {
                        message: err.to_string(),
                    }
                })?;
                Ok(Bytes::from(encoded))
            }
            MessageFormat::FullMessageFlatBuffer => SerializationSnafu {
                message: "flatbuffer encoding is not supported by the default serializer",
            }
            .fail(),
        }
    }
}
