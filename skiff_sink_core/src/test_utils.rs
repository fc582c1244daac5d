//! Shared fixtures for the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use skiff_object_store::{ObjectSink, ObjectSinkError};

use crate::record::Record;

pub struct NoopObjectSink;

#[async_trait::async_trait]
impl ObjectSink for NoopObjectSink {
    async fn put(&self, _key: &str, _data: Bytes) -> Result<(), ObjectSinkError> {
        Ok(())
    }
}

pub struct StubRecord {
    payload: Vec<u8>,
    key: Option<String>,
    topic: Option<String>,
    sequence_id: Option<u64>,
    acked: AtomicBool,
}

impl StubRecord {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            key: None,
            topic: None,
            sequence_id: None,
            acked: AtomicBool::new(false),
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }

    pub fn with_sequence_id(mut self, sequence_id: u64) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }
}

impl Record for StubRecord {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    fn sequence_id(&self) -> Option<u64> {
        self.sequence_id
    }

    fn ack(&self) {
        self.acked.store(true, Ordering::Release);
    }
}
