//! Single-record publishing: the stream publisher seam and the pooled
//! attempt contexts that carry a publish through its retries.

use std::{fmt::Write as _, sync::Arc, time::Duration, time::Instant};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Snafu;

use crate::{backoff::Backoff, record::Record};

/// Receipt returned by a successful single-record publish.
#[derive(Debug, Clone, Default)]
pub struct PublishReceipt {
    /// Shard or partition the record landed on, when the publisher reports it.
    pub shard_id: Option<String>,
    /// Sequence number assigned downstream, when the publisher reports it.
    pub sequence_number: Option<String>,
}

/// Diagnostics for one attempt made internally by the external publisher.
#[derive(Debug, Clone)]
pub struct AttemptDiagnostic {
    pub error_message: String,
    pub error_code: String,
    pub delay_ms: u64,
    pub duration_ms: u64,
}

/// Failure reported by the external publisher.
///
/// `attempts` is populated when the publisher exposes per-attempt
/// diagnostics; it is empty for opaque failures.
#[derive(Debug, Clone, Snafu)]
#[snafu(display("publish failed: {message}"))]
pub struct PublishFailure {
    pub message: String,
    pub attempts: Vec<AttemptDiagnostic>,
}

impl PublishFailure {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attempts: Vec::new(),
        }
    }

    /// Renders the per-attempt diagnostics for the failure log.
    pub fn format_attempts(&self) -> String {
        let mut out = String::new();
        for attempt in &self.attempts {
            let _ = write!(
                out,
                "errorMessage:{}, errorCode:{}, delay:{}, duration:{};",
                attempt.error_message, attempt.error_code, attempt.delay_ms, attempt.duration_ms
            );
        }
        out
    }
}

/// Asynchronous per-record publisher used by the stream path.
#[async_trait]
pub trait StreamPublisher: Send + Sync {
    async fn publish(
        &self,
        stream: &str,
        partition_key: &str,
        data: Bytes,
    ) -> Result<PublishReceipt, PublishFailure>;

    /// Flush any records the publisher buffered internally. Called once
    /// while the pipeline closes, before the publisher is released.
    async fn flush(&self) -> Result<(), PublishFailure> {
        Ok(())
    }
}

/// A single-record publish accepted from the ingestion path.
pub(crate) struct PublishRequest {
    pub record: Arc<dyn Record>,
    pub partition_key: Arc<str>,
    pub data: Bytes,
}

/// Index into the attempt pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AttemptHandle(usize);

/// In-flight context for one retryable publish.
pub(crate) struct AttemptContext {
    pub record: Arc<dyn Record>,
    pub partition_key: Arc<str>,
    pub data: Bytes,
    pub started_at: Instant,
}

struct AttemptSlot {
    context: Option<AttemptContext>,
    backoff: Option<Backoff>,
}

/// Bounded pool of publish attempt contexts.
///
/// Slots are reused across attempts so steady-state publishing does not
/// allocate per attempt. A handle points at a populated slot from acquire
/// until release; release clears the context and resets the slot's backoff,
/// so the next occupant starts from the initial delay. The pool is owned by
/// the worker task, which is what keeps a handle from ever being visible to
/// two in-flight attempts.
pub(crate) struct AttemptPool {
    slots: Vec<AttemptSlot>,
    free: Vec<usize>,
    capacity: usize,
}

impl AttemptPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
        }
    }

    /// Claims a slot for `request`, attaching `backoff` when the attempt is
    /// retryable. Returns `None` when every slot is in flight.
    pub fn acquire(
        &mut self,
        request: PublishRequest,
        backoff: Option<Backoff>,
    ) -> Option<AttemptHandle> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(AttemptSlot {
                    context: None,
                    backoff: None,
                });
                self.slots.len() - 1
            }
            None => return None,
        };

        let slot = &mut self.slots[index];
        slot.context = Some(AttemptContext {
            record: request.record,
            partition_key: request.partition_key,
            data: request.data,
            started_at: Instant::now(),
        });
        // Keep the slot's own backoff when the new occupant wants one; it
        // was reset at release.
        slot.backoff = match (slot.backoff.take(), backoff) {
            (Some(existing), Some(_)) => Some(existing),
            (_, incoming) => incoming,
        };

        Some(AttemptHandle(index))
    }

    pub fn get(&self, handle: AttemptHandle) -> Option<&AttemptContext> {
        self.slots.get(handle.0).and_then(|s| s.context.as_ref())
    }

    /// Next retry delay for the attempt, or `None` when it has no retry
    /// policy attached.
    pub fn next_retry_delay(&mut self, handle: AttemptHandle) -> Option<Duration> {
        let slot = self.slots.get_mut(handle.0)?;
        slot.context.as_ref()?;
        slot.backoff.as_mut().map(Backoff::next)
    }

    /// Returns the slot to the free list after a terminal outcome.
    pub fn release(&mut self, handle: AttemptHandle) {
        let Some(slot) = self.slots.get_mut(handle.0) else {
            return;
        };
        if slot.context.take().is_none() {
            return;
        }
        if let Some(backoff) = &mut slot.backoff {
            backoff.reset();
        }
        self.free.push(handle.0);
    }

    pub fn in_flight(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubRecord;

    fn request(payload: &[u8]) -> PublishRequest {
        PublishRequest {
            record: Arc::new(StubRecord::new(payload)),
            partition_key: Arc::from("key"),
            data: Bytes::copy_from_slice(payload),
        }
    }

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(100), Duration::from_millis(1_000))
    }

    #[test]
    fn released_slots_are_reused() {
        let mut pool = AttemptPool::new(4);

        let first = pool.acquire(request(b"a"), None).unwrap();
        pool.release(first);
        let second = pool.acquire(request(b"b"), None).unwrap();

        assert_eq!(first, second);
        assert_eq!(1, pool.in_flight());
    }

    #[test]
    fn pool_is_bounded() {
        let mut pool = AttemptPool::new(2);

        let a = pool.acquire(request(b"a"), None).unwrap();
        let _b = pool.acquire(request(b"b"), None).unwrap();
        assert!(pool.acquire(request(b"c"), None).is_none());

        pool.release(a);
        assert!(pool.acquire(request(b"c"), None).is_some());
    }

    #[test]
    fn backoff_is_reset_across_reuse() {
        let mut pool = AttemptPool::new(2);

        let handle = pool.acquire(request(b"a"), Some(backoff())).unwrap();
        assert_eq!(
            Some(Duration::from_millis(100)),
            pool.next_retry_delay(handle)
        );
        assert_eq!(
            Some(Duration::from_millis(200)),
            pool.next_retry_delay(handle)
        );
        pool.release(handle);

        let reused = pool.acquire(request(b"b"), Some(backoff())).unwrap();
        assert_eq!(handle, reused);
        assert_eq!(
            Some(Duration::from_millis(100)),
            pool.next_retry_delay(reused)
        );
    }

    #[test]
    fn attempt_without_policy_has_no_retry_delay() {
        let mut pool = AttemptPool::new(2);

        let handle = pool.acquire(request(b"a"), None).unwrap();
        assert_eq!(None, pool.next_retry_delay(handle));
    }

    #[test]
    fn double_release_is_harmless() {
        let mut pool = AttemptPool::new(2);

        let handle = pool.acquire(request(b"a"), None).unwrap();
        pool.release(handle);
        pool.release(handle);

        assert_eq!(0, pool.in_flight());
        assert!(pool.acquire(request(b"b"), None).is_some());
        assert!(pool.acquire(request(b"c"), None).is_some());
        assert!(pool.acquire(request(b"d"), None).is_none());
    }
}
