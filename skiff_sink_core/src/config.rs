use std::time::Duration;

use serde::Deserialize;
use snafu::ensure;

use crate::error::{Result, ValidationSnafu};

/// Message encoding handed to the serializer. Opaque to the pipeline core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    /// Publish the raw record payload.
    #[default]
    RawPayload,
    /// Publish the full message as a JSON envelope.
    FullMessageJson,
    /// Publish the full message as JSON with the value expanded in place.
    FullMessageJsonExpandValue,
    /// Publish the full message as a FlatBuffer.
    FullMessageFlatBuffer,
}

/// Which publishing strategy the pipeline routes writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Accumulate serialized records and upload them in bulk to the object
    /// sink.
    #[default]
    Batch,
    /// Publish each record individually through the stream publisher, with
    /// retry and ordering enforcement. In-flight publishes are bounded by
    /// the worker's attempt pool; a publish arriving while every slot is
    /// taken is dropped and counted as a failure, which gates later writes
    /// when `retain_ordering` is on.
    Stream,
}

/// Sink configuration.
///
/// `batch_size` bounds both the pending queue capacity and the per-flush
/// drain size, so a full queue stalls producers instead of growing memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Name of the downstream stream the records are published to.
    pub stream_name: String,
    /// Bucket receiving batched uploads.
    pub bucket_name: String,
    /// Explicit service endpoint. Either this or `region` must be set.
    pub endpoint: Option<String>,
    /// Port appended to the endpoint when set.
    pub endpoint_port: Option<u16>,
    /// Service region. Either this or `endpoint` must be set.
    pub region: Option<String>,
    /// Records accumulated before a flush is triggered.
    pub batch_size: usize,
    /// Reject new records while a previous publish failure is unresolved.
    pub retain_ordering: bool,
    /// Initial delay between publish retries. Zero disables retries.
    pub retry_initial_delay_ms: u64,
    /// Ceiling for the exponential retry delay.
    pub retry_max_delay_ms: u64,
    pub message_format: MessageFormat,
    pub publish_mode: PublishMode,
    /// Named credential resolver. `open` recognizes the built-in `static`
    /// inline-JSON resolver (also the default) and rejects other names;
    /// hosts with their own resolvers construct the pipeline directly.
    pub credential_name: Option<String>,
    /// Parameters handed to the credential resolver, as a JSON map.
    pub credential_param: String,
    /// Skip TLS certificate validation, for self-signed test endpoints.
    pub skip_certificate_validation: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            bucket_name: String::new(),
            endpoint: None,
            endpoint_port: None,
            region: None,
            batch_size: 100,
            retain_ordering: false,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 60_000,
            message_format: MessageFormat::default(),
            publish_mode: PublishMode::default(),
            credential_name: None,
            credential_param: String::new(),
            skip_certificate_validation: false,
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.stream_name.trim().is_empty(),
            ValidationSnafu {
                message: "empty stream name",
            }
        );
        ensure!(
            self.has_value(self.endpoint.as_deref()) || self.has_value(self.region.as_deref()),
            ValidationSnafu {
                message: "either the endpoint or the region must be set",
            }
        );
        ensure!(
            !self.credential_param.trim().is_empty(),
            ValidationSnafu {
                message: "empty credential param",
            }
        );
        ensure!(
            self.batch_size >= 1,
            ValidationSnafu {
                message: "batch size must be at least 1",
            }
        );
        if self.publish_mode == PublishMode::Batch {
            ensure!(
                !self.bucket_name.trim().is_empty(),
                ValidationSnafu {
                    message: "empty bucket name",
                }
            );
        }
        ensure!(
            self.retry_max_delay_ms >= self.retry_initial_delay_ms,
            ValidationSnafu {
                message: "retry max delay must be at least the initial delay",
            }
        );

        Ok(())
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    fn has_value(&self, field: Option<&str>) -> bool {
        field.is_some_and(|value| !value.trim().is_empty())
    }
}
