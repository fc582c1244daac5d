use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use skiff_object_store::{ObjectSink, ObjectSinkError, UploadSnafu};
use skiff_sink_core::{
    pipeline::run_background_pipeline, DefaultSerializer, PublishFailure, PublishMode,
    PublishReceipt, Record, SinkConfig, SinkPipeline, StreamPublisher,
};
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestRecord {
    payload: Vec<u8>,
    key: Option<String>,
    sequence_id: Option<u64>,
    acked: AtomicBool,
}

impl TestRecord {
    pub fn new(payload: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            payload: payload.to_vec(),
            key: None,
            sequence_id: None,
            acked: AtomicBool::new(false),
        })
    }

    pub fn with_sequence(payload: &[u8], sequence_id: u64) -> Arc<Self> {
        Arc::new(Self {
            payload: payload.to_vec(),
            key: Some(format!("key-{sequence_id}")),
            sequence_id: Some(sequence_id),
            acked: AtomicBool::new(false),
        })
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }
}

impl Record for TestRecord {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn sequence_id(&self) -> Option<u64> {
        self.sequence_id
    }

    fn ack(&self) {
        self.acked.store(true, Ordering::Release);
    }
}

/// Object sink recording every stored object, with injectable failures.
#[derive(Default)]
pub struct MemoryObjectSink {
    puts: Mutex<Vec<(String, Bytes)>>,
    attempts: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MemoryObjectSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn puts(&self) -> Vec<(String, Bytes)> {
        self.puts.lock().expect("sink lock").clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Release);
    }
}

#[async_trait::async_trait]
impl ObjectSink for MemoryObjectSink {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectSinkError> {
        self.attempts.fetch_add(1, Ordering::AcqRel);

        if self.fail_puts.load(Ordering::Acquire) {
            return Err(object_store::Error::Generic {
                store: "memory",
                source: "injected put failure".into(),
            })
            .context(UploadSnafu {
                key,
                message: "injected put failure",
            });
        }

        self.puts
            .lock()
            .expect("sink lock")
            .push((key.to_string(), data));
        Ok(())
    }
}

/// Publisher replaying a scripted sequence of outcomes, then falling back
/// to a fixed default.
pub struct ScriptedPublisher {
    script: Mutex<VecDeque<Result<PublishReceipt, PublishFailure>>>,
    fail_by_default: bool,
    publish_count: AtomicUsize,
}

impl ScriptedPublisher {
    pub fn succeeding() -> Arc<Self> {
        Self::scripted(Vec::new(), false)
    }

    pub fn failing() -> Arc<Self> {
        Self::scripted(Vec::new(), true)
    }

    pub fn scripted(
        outcomes: Vec<Result<PublishReceipt, PublishFailure>>,
        fail_by_default: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            fail_by_default,
            publish_count: AtomicUsize::new(0),
        })
    }

    pub fn publish_count(&self) -> usize {
        self.publish_count.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl StreamPublisher for ScriptedPublisher {
    async fn publish(
        &self,
        _stream: &str,
        _partition_key: &str,
        _data: Bytes,
    ) -> Result<PublishReceipt, PublishFailure> {
        self.publish_count.fetch_add(1, Ordering::AcqRel);

        if let Some(outcome) = self.script.lock().expect("script lock").pop_front() {
            return outcome;
        }

        if self.fail_by_default {
            Err(PublishFailure::from_message("scripted failure"))
        } else {
            Ok(PublishReceipt::default())
        }
    }
}

pub fn batch_config(batch_size: usize) -> SinkConfig {
    SinkConfig {
        stream_name: "events".to_string(),
        bucket_name: "events-archive".to_string(),
        region: Some("us-east-1".to_string()),
        credential_param: r#"{"accessKey":"test","secretKey":"test"}"#.to_string(),
        batch_size,
        ..SinkConfig::default()
    }
}

pub fn stream_config(retain_ordering: bool, retry_initial_delay_ms: u64) -> SinkConfig {
    SinkConfig {
        publish_mode: PublishMode::Stream,
        retain_ordering,
        retry_initial_delay_ms,
        retry_max_delay_ms: retry_initial_delay_ms.max(60_000),
        ..batch_config(10)
    }
}

pub fn create_batch_pipeline(
    config: SinkConfig,
    sink: Arc<MemoryObjectSink>,
) -> skiff_sink_core::Result<SinkPipeline> {
    SinkPipeline::new(config, Arc::new(DefaultSerializer), sink, None)
}

pub fn create_stream_pipeline(
    config: SinkConfig,
    publisher: Arc<ScriptedPublisher>,
) -> skiff_sink_core::Result<SinkPipeline> {
    SinkPipeline::new(
        config,
        Arc::new(DefaultSerializer),
        MemoryObjectSink::new(),
        Some(publisher as Arc<dyn StreamPublisher>),
    )
}

pub fn spawn_pipeline(
    pipeline: SinkPipeline,
) -> (
    JoinHandle<()>,
    skiff_sink_core::SinkHandle,
    CancellationToken,
) {
    let handle = pipeline.handle();
    let ct = CancellationToken::new();
    let task = tokio::spawn({
        let ct = ct.clone();
        async move {
            run_background_pipeline(pipeline, ct)
                .await
                .expect("pipeline run");
        }
    });

    (task, handle, ct)
}

pub async fn wait_for(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {description}");
}
