//! The record seam between the host shell and the pipeline.

/// Partition key used when the record carries neither a key nor a topic.
pub const DEFAULT_PARTITION_KEY: &str = "default";

/// Maximum partition key length accepted downstream.
pub const MAX_PARTITION_KEY_LENGTH: usize = 256;

/// An externally-owned input record.
///
/// The pipeline only reads the identity fields and invokes [`Record::ack`]
/// on success; it never mutates the record. The record must stay valid until
/// it is acked or the pipeline is closed, including across retries.
pub trait Record: Send + Sync {
    /// The opaque payload to publish.
    fn payload(&self) -> &[u8];

    /// Key used to derive the partition key.
    fn key(&self) -> Option<&str> {
        None
    }

    /// Topic the record was read from; fallback for the partition key.
    fn topic(&self) -> Option<&str> {
        None
    }

    /// Sequence token assigned by the upstream source.
    fn sequence_id(&self) -> Option<u64> {
        None
    }

    /// Acknowledge the record to the upstream source.
    fn ack(&self);
}

/// Derives the partition key: record key, else topic, else the default.
///
/// Keys longer than the maximum are clamped to their first 255 characters.
/// The result is never empty.
pub fn derive_partition_key(record: &dyn Record) -> String {
    let key = record
        .key()
        .filter(|key| !key.is_empty())
        .or_else(|| record.topic().filter(|topic| !topic.is_empty()))
        .unwrap_or(DEFAULT_PARTITION_KEY);

    if key.chars().count() > MAX_PARTITION_KEY_LENGTH {
        key.chars().take(MAX_PARTITION_KEY_LENGTH - 1).collect()
    } else {
        key.to_string()
    }
}
