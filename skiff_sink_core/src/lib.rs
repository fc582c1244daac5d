pub mod backoff;
pub mod buffer;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod publish;
pub mod record;
pub mod serializer;

#[cfg(test)]
pub mod test_utils;

pub use backoff::Backoff;
pub use buffer::concat_buffers;
pub use config::{MessageFormat, PublishMode, SinkConfig};
pub use error::{Result, SinkError};
pub use pipeline::{
    run_background_pipeline, BlobIdGenerator, SinkHandle, SinkPipeline, TimestampBlobIds,
    UlidBlobIds,
};
pub use publish::{AttemptDiagnostic, PublishFailure, PublishReceipt, StreamPublisher};
pub use record::{derive_partition_key, Record};
pub use serializer::{DefaultSerializer, Serializer};
