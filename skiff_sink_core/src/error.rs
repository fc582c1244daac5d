use std::sync::Arc;

use skiff_object_store::ObjectSinkError;
use snafu::Snafu;

/// Sink error types.
///
/// Errors raised from `write` surface to the host shell, which typically
/// triggers redelivery of the record upstream; their messages should say
/// what the caller can do about them.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// A previous publish failed and ordering enforcement is on; no new
    /// records are accepted until the failure resolves.
    #[snafu(display("ordering violation: a previous publish failed and is still unresolved"))]
    OrderingViolation,
    /// The serializer rejected the record.
    #[snafu(display("serialization error: {message}"))]
    Serialization { message: String },
    /// A configuration precondition is not met.
    #[snafu(display("validation error: {message}"))]
    Validation { message: String },
    /// The assembled batch would exceed the single-buffer ceiling. Signals a
    /// misconfigured batch size, not a transient condition.
    #[snafu(display("batch too large: {total_bytes} bytes exceed the single-buffer ceiling"))]
    BatchTooLarge { total_bytes: u64 },
    /// Object store error.
    #[snafu(display("object store error: {message}"))]
    ObjectStore {
        message: &'static str,
        #[snafu(source(from(ObjectSinkError, Arc::new)))]
        source: Arc<ObjectSinkError>,
    },
    /// The sink no longer accepts writes.
    #[snafu(display("sink is closed"))]
    Closed,
    /// The background worker is gone.
    #[snafu(display("pipeline stopped"))]
    PipelineStopped,
}

pub type Result<T, E = SinkError> = std::result::Result<T, E>;
