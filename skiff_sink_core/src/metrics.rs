use skiff_observability::Counter;

/// Counters emitted by the pipeline. Best-effort; never fail a write.
pub struct SinkMetrics {
    pub records_incoming: Counter<u64>,
    pub bytes_incoming: Counter<u64>,
    pub records_success: Counter<u64>,
    pub records_failure: Counter<u64>,
}

impl Default for SinkMetrics {
    fn default() -> Self {
        let meter = skiff_observability::meter("skiff.sink");
        Self {
            records_incoming: meter
                .u64_counter("sink.records.incoming")
                .with_unit("{record}")
                .with_description("records accepted by the ingestion path")
                .build(),
            bytes_incoming: meter
                .u64_counter("sink.bytes.incoming")
                .with_unit("By")
                .with_description("serialized bytes accepted by the ingestion path")
                .build(),
            records_success: meter
                .u64_counter("sink.records.success")
                .with_unit("{record}")
                .with_description("records published successfully on the stream path")
                .build(),
            records_failure: meter
                .u64_counter("sink.records.failure")
                .with_unit("{record}")
                .with_description("failed publish attempts on the stream path")
                .build(),
        }
    }
}
