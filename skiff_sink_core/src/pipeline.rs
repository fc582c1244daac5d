//! The pipeline worker and its client handle.
//!
//! ## Data flow
//!
//! **Batch mode**: `write` -> pending queue -> flush scheduler -> buffer
//! assembly -> object sink.
//!
//! **Stream mode**: `write` -> publish command -> attempt pool -> stream
//! publisher, with retries through the worker's delay queue.
//!
//! A single worker task executes flushes, publish completions, and retry
//! timers, so none of them ever run concurrently with each other.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use bytesize::ByteSize;
use futures_util::{future::BoxFuture, stream::FuturesUnordered, StreamExt};
use skiff_object_store::{create_bucket_sink, BucketSinkOptions, ObjectSink, StaticCredentialResolver};
use snafu::{ensure, OptionExt, ResultExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::{sync::CancellationToken, time::DelayQueue};
use tracing::{debug, error, info, warn};

use crate::{
    backoff::Backoff,
    buffer::concat_buffers,
    config::{PublishMode, SinkConfig},
    error::{
        ClosedSnafu, ObjectStoreSnafu, OrderingViolationSnafu, PipelineStoppedSnafu, Result,
        ValidationSnafu,
    },
    metrics::SinkMetrics,
    publish::{AttemptHandle, AttemptPool, PublishFailure, PublishReceipt, PublishRequest},
    record::{derive_partition_key, Record},
    serializer::Serializer,
    StreamPublisher,
};

const COMMAND_QUEUE_CAPACITY: usize = 16;
const ATTEMPT_POOL_CAPACITY: usize = 1024;

/// Trait for generating unique object keys for uploaded batches.
pub trait BlobIdGenerator: Send + Sync + 'static {
    fn generate_id(&self) -> String;
}

/// Generates keys from the current wall-clock time in nanoseconds.
///
/// At the expected flush rate a high-resolution timestamp is a sufficient
/// uniqueness source.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampBlobIds;

impl BlobIdGenerator for TimestampBlobIds {
    fn generate_id(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        now.as_nanos().to_string()
    }
}

/// Generates keys using the ULID algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct UlidBlobIds;

impl BlobIdGenerator for UlidBlobIds {
    fn generate_id(&self) -> String {
        ulid::Ulid::new().to_string()
    }
}

/// State shared between the ingestion side and the worker.
///
/// The ordering flag and the flush guard only gate accept/reject decisions,
/// never data, so plain atomics are enough.
#[derive(Debug, Default)]
struct PipelineShared {
    previous_publish_failed: AtomicBool,
    current_batch_size: AtomicU64,
    is_flush_running: AtomicBool,
    closed: AtomicBool,
}

impl PipelineShared {
    fn previous_publish_failed(&self) -> bool {
        self.previous_publish_failed.load(Ordering::Acquire)
    }

    fn set_previous_publish_failed(&self, failed: bool) {
        self.previous_publish_failed.store(failed, Ordering::Release);
    }

    fn current_batch_size(&self) -> u64 {
        self.current_batch_size.load(Ordering::Acquire)
    }

    fn record_enqueued(&self) {
        self.current_batch_size.fetch_add(1, Ordering::AcqRel);
    }

    fn record_drained(&self, count: u64) {
        let _ = self
            .current_batch_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
    }

    fn is_flush_running(&self) -> bool {
        self.is_flush_running.load(Ordering::Acquire)
    }

    fn try_begin_flush(&self) -> bool {
        self.is_flush_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn end_flush(&self) {
        self.is_flush_running.store(false, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

enum Command {
    Flush { force: bool },
    Publish(PublishRequest),
    Close { reply: oneshot::Sender<()> },
}

struct FlushOutcome {
    key: String,
    items: usize,
    result: Result<usize>,
}

type FlushFuture = BoxFuture<'static, FlushOutcome>;
type PublishFuture = BoxFuture<'static, (AttemptHandle, Result<PublishReceipt, PublishFailure>)>;

/// The pipeline worker. Built once, then driven by [`SinkPipeline::run`] on
/// a task the host spawns; clients interact through [`SinkHandle`].
pub struct SinkPipeline {
    config: Arc<SinkConfig>,
    shared: Arc<PipelineShared>,
    payload_tx: mpsc::Sender<Bytes>,
    payload_rx: mpsc::Receiver<Bytes>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    serializer: Arc<dyn Serializer>,
    object_sink: Arc<dyn ObjectSink>,
    publisher: Option<Arc<dyn StreamPublisher>>,
    blob_ids: Arc<dyn BlobIdGenerator>,
    metrics: Arc<SinkMetrics>,
}

/// Cloneable client side of the pipeline.
#[derive(Clone)]
pub struct SinkHandle {
    config: Arc<SinkConfig>,
    shared: Arc<PipelineShared>,
    payload_tx: mpsc::Sender<Bytes>,
    command_tx: mpsc::Sender<Command>,
    serializer: Arc<dyn Serializer>,
    metrics: Arc<SinkMetrics>,
}

pub async fn run_background_pipeline(pipeline: SinkPipeline, ct: CancellationToken) -> Result<()> {
    pipeline.run(ct).await
}

impl SinkPipeline {
    pub fn new(
        config: SinkConfig,
        serializer: Arc<dyn Serializer>,
        object_sink: Arc<dyn ObjectSink>,
        publisher: Option<Arc<dyn StreamPublisher>>,
    ) -> Result<Self> {
        config.validate()?;
        if config.publish_mode == PublishMode::Stream {
            ensure!(
                publisher.is_some(),
                ValidationSnafu {
                    message: "publish mode 'stream' requires a stream publisher",
                }
            );
        }

        let (payload_tx, payload_rx) = mpsc::channel(config.batch_size);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            shared: Arc::new(PipelineShared::default()),
            payload_tx,
            payload_rx,
            command_tx,
            command_rx,
            serializer,
            object_sink,
            publisher,
            blob_ids: Arc::new(TimestampBlobIds),
            metrics: Arc::new(SinkMetrics::default()),
        })
    }

    /// Opens a batch-mode pipeline from configuration alone, resolving
    /// credentials and building the bucket sink.
    pub async fn open(config: SinkConfig, serializer: Arc<dyn Serializer>) -> Result<Self> {
        config.validate()?;

        let resolver = match config.credential_name.as_deref() {
            None | Some("") | Some("static") => {
                StaticCredentialResolver::new(&config.credential_param)
            }
            Some(name) => {
                return ValidationSnafu {
                    message: format!("unknown credential resolver '{name}'"),
                }
                .fail()
            }
        };
        let options = BucketSinkOptions {
            bucket_name: config.bucket_name.clone(),
            endpoint: config.endpoint.clone(),
            endpoint_port: config.endpoint_port,
            region: config.region.clone(),
            skip_certificate_validation: config.skip_certificate_validation,
        };
        let sink = create_bucket_sink(&options, &resolver)
            .await
            .context(ObjectStoreSnafu {
                message: "failed to create the bucket sink",
            })?;

        Self::new(config, serializer, Arc::new(sink), None)
    }

    /// Replaces the object key generator. Mostly useful in tests.
    pub fn with_blob_ids(mut self, blob_ids: Arc<dyn BlobIdGenerator>) -> Self {
        self.blob_ids = blob_ids;
        self
    }

    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            config: self.config.clone(),
            shared: self.shared.clone(),
            payload_tx: self.payload_tx.clone(),
            command_tx: self.command_tx.clone(),
            serializer: self.serializer.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let Self {
            config,
            shared,
            payload_tx: _,
            mut payload_rx,
            command_tx: _,
            mut command_rx,
            serializer: _,
            object_sink,
            publisher,
            blob_ids,
            metrics,
        } = self;

        let worker = Worker {
            config,
            shared,
            object_sink,
            publisher,
            blob_ids,
            metrics,
        };

        let mut pool = AttemptPool::new(ATTEMPT_POOL_CAPACITY);
        let mut retry_timer: DelayQueue<AttemptHandle> = DelayQueue::new();
        let mut flush_tasks: FuturesUnordered<FlushFuture> = FuturesUnordered::new();
        let mut publish_tasks: FuturesUnordered<PublishFuture> = FuturesUnordered::new();

        info!(
            stream = %worker.config.stream_name,
            mode = ?worker.config.publish_mode,
            batch_size = worker.config.batch_size,
            "sink pipeline started"
        );

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    break;
                }
                maybe_command = command_rx.recv() => {
                    let Some(command) = maybe_command else {
                        break;
                    };

                    match command {
                        Command::Flush { force } => {
                            worker.handle_flush(force, &mut payload_rx, &mut flush_tasks);
                        }
                        Command::Publish(request) => {
                            worker.handle_publish(request, &mut pool, &mut publish_tasks);
                        }
                        Command::Close { reply } => {
                            worker.handle_close(&mut payload_rx, &mut flush_tasks).await;
                            let _ = reply.send(());
                            break;
                        }
                    }
                }
                expired = retry_timer.next(), if !retry_timer.is_empty() => {
                    let Some(entry) = expired else {
                        continue;
                    };
                    worker.start_attempt(entry.into_inner(), &pool, &mut publish_tasks);
                }
                outcome = flush_tasks.next(), if !flush_tasks.is_empty() => {
                    let Some(outcome) = outcome else {
                        continue;
                    };
                    worker.shared.end_flush();
                    worker.log_flush(&outcome);
                }
                completed = publish_tasks.next(), if !publish_tasks.is_empty() => {
                    let Some((handle, result)) = completed else {
                        continue;
                    };
                    worker.complete_attempt(handle, result, &mut pool, &mut retry_timer);
                }
            }
        }

        info!(stream = %worker.config.stream_name, "sink pipeline stopped");
        Ok(())
    }
}

struct Worker {
    config: Arc<SinkConfig>,
    shared: Arc<PipelineShared>,
    object_sink: Arc<dyn ObjectSink>,
    publisher: Option<Arc<dyn StreamPublisher>>,
    blob_ids: Arc<dyn BlobIdGenerator>,
    metrics: Arc<SinkMetrics>,
}

impl Worker {
    fn handle_flush(
        &self,
        force: bool,
        payload_rx: &mut mpsc::Receiver<Bytes>,
        flush_tasks: &mut FuturesUnordered<FlushFuture>,
    ) {
        debug!(
            pending = self.shared.current_batch_size(),
            batch_size = self.config.batch_size,
            force,
            "flush requested"
        );

        if payload_rx.is_empty() {
            debug!("skipping flush, the pending queue is empty");
            return;
        }

        if !self.shared.try_begin_flush() {
            debug!("skipping flush, another flush is outstanding");
            return;
        }

        let items = drain_pending(payload_rx, self.config.batch_size);
        self.shared.record_drained(items.len() as u64);
        let key = self.blob_ids.generate_id();
        flush_tasks.push(Box::pin(flush_batch(
            self.object_sink.clone(),
            key,
            items,
        )));
    }

    fn log_flush(&self, outcome: &FlushOutcome) {
        match &outcome.result {
            Ok(bytes) => {
                info!(
                    stream = %self.config.stream_name,
                    key = %outcome.key,
                    items = outcome.items,
                    size = %ByteSize(*bytes as u64),
                    "flushed batch"
                );
            }
            Err(err) => {
                error!(
                    stream = %self.config.stream_name,
                    key = %outcome.key,
                    items = outcome.items,
                    error = %err,
                    "failed to flush batch, dropping it"
                );
            }
        }
    }

    fn handle_publish(
        &self,
        request: PublishRequest,
        pool: &mut AttemptPool,
        publish_tasks: &mut FuturesUnordered<PublishFuture>,
    ) {
        match pool.acquire(request, self.retry_backoff()) {
            Some(handle) => self.start_attempt(handle, pool, publish_tasks),
            None => {
                self.shared.set_previous_publish_failed(true);
                self.metrics.records_failure.add(1, &[]);
                error!(
                    stream = %self.config.stream_name,
                    in_flight = pool.in_flight(),
                    "attempt pool exhausted, dropping publish"
                );
            }
        }
    }

    fn retry_backoff(&self) -> Option<Backoff> {
        if !self.config.retain_ordering {
            return None;
        }
        let initial = self.config.retry_initial_delay();
        if initial.is_zero() {
            return None;
        }
        Some(Backoff::new(initial, self.config.retry_max_delay()))
    }

    fn start_attempt(
        &self,
        handle: AttemptHandle,
        pool: &AttemptPool,
        publish_tasks: &mut FuturesUnordered<PublishFuture>,
    ) {
        let Some(publisher) = self.publisher.clone() else {
            error!("no stream publisher configured, dropping publish attempt");
            return;
        };
        let Some(context) = pool.get(handle) else {
            error!(?handle, "no in-flight attempt behind handle");
            return;
        };

        let stream = self.config.stream_name.clone();
        let partition_key = context.partition_key.clone();
        let data = context.data.clone();

        publish_tasks.push(Box::pin(async move {
            let result = publisher.publish(&stream, &partition_key, data).await;
            (handle, result)
        }));
    }

    fn complete_attempt(
        &self,
        handle: AttemptHandle,
        result: Result<PublishReceipt, PublishFailure>,
        pool: &mut AttemptPool,
        retry_timer: &mut DelayQueue<AttemptHandle>,
    ) {
        match result {
            Ok(receipt) => {
                self.shared.set_previous_publish_failed(false);
                self.metrics.records_success.add(1, &[]);
                if let Some(context) = pool.get(handle) {
                    debug!(
                        stream = %self.config.stream_name,
                        shard = ?receipt.shard_id,
                        sequence_id = ?context.record.sequence_id(),
                        latency_ms = context.started_at.elapsed().as_millis() as u64,
                        "published record"
                    );
                    context.record.ack();
                }
                pool.release(handle);
            }
            Err(failure) => {
                self.shared.set_previous_publish_failed(true);
                self.metrics.records_failure.add(1, &[]);
                let sequence_id = pool.get(handle).and_then(|c| c.record.sequence_id());
                if failure.attempts.is_empty() {
                    error!(
                        stream = %self.config.stream_name,
                        sequence_id = ?sequence_id,
                        error = %failure,
                        "failed to publish record"
                    );
                } else {
                    error!(
                        stream = %self.config.stream_name,
                        sequence_id = ?sequence_id,
                        attempts = %failure.format_attempts(),
                        "failed to publish record"
                    );
                }

                match pool.next_retry_delay(handle) {
                    Some(delay) => {
                        info!(
                            stream = %self.config.stream_name,
                            sequence_id = ?sequence_id,
                            delay_ms = delay.as_millis() as u64,
                            "retrying publish"
                        );
                        retry_timer.insert(handle, delay);
                    }
                    None => pool.release(handle),
                }
            }
        }
    }

    async fn handle_close(
        &self,
        payload_rx: &mut mpsc::Receiver<Bytes>,
        flush_tasks: &mut FuturesUnordered<FlushFuture>,
    ) {
        if let Some(publisher) = &self.publisher {
            if let Err(err) = publisher.flush().await {
                error!(error = %err, "failed to flush the stream publisher during close");
            }
        }

        // Let any outstanding flush finish before the final forced one.
        while let Some(outcome) = flush_tasks.next().await {
            self.shared.end_flush();
            self.log_flush(&outcome);
        }

        if !payload_rx.is_empty() {
            let items = drain_pending(payload_rx, self.config.batch_size);
            self.shared.record_drained(items.len() as u64);
            let key = self.blob_ids.generate_id();
            let outcome = flush_batch(self.object_sink.clone(), key, items).await;
            self.log_flush(&outcome);
        }
    }
}

impl SinkHandle {
    /// Accepts one record into the pipeline.
    ///
    /// Blocks only when the pending queue is full; that stall is the
    /// pipeline's backpressure mechanism and callers must tolerate it.
    pub async fn write(&self, record: Arc<dyn Record>) -> Result<()> {
        ensure!(!self.shared.is_closed(), ClosedSnafu);

        // A failure seen by a completion callback fails the write here, on
        // the caller's side, to maintain the external ordering contract.
        if self.config.retain_ordering && self.shared.previous_publish_failed() {
            warn!(
                stream = %self.config.stream_name,
                sequence_id = ?record.sequence_id(),
                "skipping record to retain ordering with a previously failed publish"
            );
            return OrderingViolationSnafu.fail();
        }

        let partition_key = derive_partition_key(record.as_ref());
        let data = self
            .serializer
            .serialize(record.as_ref(), self.config.message_format)?;
        let size = data.len();

        match self.config.publish_mode {
            PublishMode::Batch => {
                self.payload_tx
                    .send(data)
                    .await
                    .ok()
                    .context(PipelineStoppedSnafu)?;
                self.shared.record_enqueued();
                self.flush_if_needed(false).await?;
            }
            PublishMode::Stream => {
                let request = PublishRequest {
                    record,
                    partition_key: partition_key.into(),
                    data,
                };
                self.command_tx
                    .send(Command::Publish(request))
                    .await
                    .ok()
                    .context(PipelineStoppedSnafu)?;
            }
        }

        self.metrics.records_incoming.add(1, &[]);
        self.metrics.bytes_incoming.add(size as u64, &[]);
        debug!(stream = %self.config.stream_name, size, "accepted record");

        Ok(())
    }

    /// Stops accepting writes, forces one final flush of residual pending
    /// items, and resolves once the worker confirms.
    pub async fn close(self) -> Result<()> {
        self.shared.mark_closed();

        if let Err(err) = self.flush_if_needed(true).await {
            debug!(error = %err, "no flush trigger during close, worker already gone");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Close { reply: reply_tx })
            .await
            .ok()
            .context(PipelineStoppedSnafu)?;

        reply_rx.await.ok().context(PipelineStoppedSnafu)
    }

    async fn flush_if_needed(&self, force: bool) -> Result<()> {
        if self.shared.is_flush_running() {
            return Ok(());
        }
        if force || self.shared.current_batch_size() >= self.config.batch_size as u64 {
            self.command_tx
                .send(Command::Flush { force })
                .await
                .ok()
                .context(PipelineStoppedSnafu)?;
        }
        Ok(())
    }
}

fn drain_pending(payload_rx: &mut mpsc::Receiver<Bytes>, max: usize) -> Vec<Bytes> {
    let mut items = Vec::with_capacity(max);
    while items.len() < max {
        match payload_rx.try_recv() {
            Ok(item) => items.push(item),
            Err(_) => break,
        }
    }
    items
}

async fn flush_batch(sink: Arc<dyn ObjectSink>, key: String, items: Vec<Bytes>) -> FlushOutcome {
    let count = items.len();
    let result = upload_batch(sink, &key, items).await;
    FlushOutcome {
        key,
        items: count,
        result,
    }
}

async fn upload_batch(sink: Arc<dyn ObjectSink>, key: &str, items: Vec<Bytes>) -> Result<usize> {
    let data = concat_buffers(&items)?;
    let size = data.len();
    sink.put(key, data).await.context(ObjectStoreSnafu {
        message: "failed to upload batch",
    })?;
    Ok(size)
}
