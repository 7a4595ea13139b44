//! Metrics and observability utilities
//!
//! Prometheus metrics for the ingestion and retrieval paths. Recording is a
//! no-op until a recorder is installed, so library callers never need to
//! care whether an exporter is running.

use metrics::{counter, describe_counter, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ChunkForge metrics
pub const METRICS_PREFIX: &str = "chunkforge";

pub const REQUESTS_TOTAL: &str = "chunkforge_requests_total";
pub const REQUEST_DURATION: &str = "chunkforge_request_duration_seconds";
pub const QUERIES_TOTAL: &str = "chunkforge_queries_total";
pub const QUERY_DURATION: &str = "chunkforge_query_duration_seconds";
pub const QUERY_RESULTS: &str = "chunkforge_query_results_count";
pub const INGESTIONS_TOTAL: &str = "chunkforge_ingestions_total";
pub const INGESTION_DURATION: &str = "chunkforge_ingestion_duration_seconds";
pub const CHUNKS_CREATED: &str = "chunkforge_chunks_created_total";
pub const RECORDS_INSERTED: &str = "chunkforge_records_inserted_total";
pub const EMBEDDING_BATCHES: &str = "chunkforge_embedding_batches_total";
pub const EMBEDDING_DURATION: &str = "chunkforge_embedding_duration_seconds";
pub const EMBEDDED_TEXTS: &str = "chunkforge_embedded_texts_total";
pub const EMBEDDING_RETRIES: &str = "chunkforge_embedding_retries_total";
pub const EMBEDDING_FAILURES: &str = "chunkforge_embedding_failures_total";

/// HTTP and retrieval latency, seconds
pub const LATENCY_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0];

/// One provider call; the upper end covers slow batches near the timeout
pub const EMBEDDING_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 30.0];

/// Whole ingestion runs, including backoff waits
pub const INGESTION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0];

/// Register all metric descriptions
pub fn register_metrics() {
    let counters = [
        (REQUESTS_TOTAL, "HTTP requests by route and status"),
        (QUERIES_TOTAL, "Retrieval calls by method and kind"),
        (INGESTIONS_TOTAL, "Completed ingestion runs"),
        (CHUNKS_CREATED, "Chunks produced by the chunkers"),
        (RECORDS_INSERTED, "Records written to the vector store"),
        (EMBEDDING_BATCHES, "Embedding provider calls by outcome"),
        (EMBEDDED_TEXTS, "Texts embedded successfully"),
        (EMBEDDING_RETRIES, "Embedding calls retried after a transient failure"),
        (EMBEDDING_FAILURES, "Embedding batches that failed permanently"),
    ];
    for (name, help) in counters {
        describe_counter!(name, Unit::Count, help);
    }

    let histograms = [
        (REQUEST_DURATION, "HTTP request latency"),
        (QUERY_DURATION, "Retrieval latency"),
        (INGESTION_DURATION, "Ingestion run latency"),
        (EMBEDDING_DURATION, "Embedding provider call latency"),
    ];
    for (name, help) in histograms {
        describe_histogram!(name, Unit::Seconds, help);
    }

    tracing::debug!("Metric descriptions registered");
}

/// Times one HTTP request from `start` to `finish`
pub struct RequestMetrics {
    started: Instant,
    route: String,
    method: String,
}

impl RequestMetrics {
    pub fn start(method: &str, route: &str) -> Self {
        Self {
            started: Instant::now(),
            route: route.to_string(),
            method: method.to_string(),
        }
    }

    pub fn finish(self, status: u16) {
        let elapsed = self.started.elapsed().as_secs_f64();
        counter!(
            REQUESTS_TOTAL,
            "method" => self.method.clone(),
            "route" => self.route.clone(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(REQUEST_DURATION, "method" => self.method, "route" => self.route).record(elapsed);
    }
}

/// Record a retrieval. `kind` is "query", "chat" or "get".
pub fn record_query(duration_secs: f64, method: &str, kind: &str, result_count: usize) {
    let labels = [("method", method.to_string()), ("kind", kind.to_string())];
    counter!(QUERIES_TOTAL, &labels).increment(1);
    histogram!(QUERY_DURATION, &labels).record(duration_secs);
    gauge!(QUERY_RESULTS, "method" => method.to_string()).set(result_count as f64);
}

/// Record one provider call for a batch of `batch_size` texts
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let outcome = if success { "ok" } else { "failed" };
    counter!(EMBEDDING_BATCHES, "model" => model.to_string(), "outcome" => outcome).increment(1);

    if success {
        histogram!(EMBEDDING_DURATION, "model" => model.to_string()).record(duration_secs);
        counter!(EMBEDDED_TEXTS, "model" => model.to_string()).increment(batch_size as u64);
    } else {
        counter!(EMBEDDING_FAILURES, "model" => model.to_string()).increment(1);
    }
}

pub fn record_embedding_retry(model: &str) {
    counter!(EMBEDDING_RETRIES, "model" => model.to_string()).increment(1);
}

/// Record a completed ingestion run
pub fn record_ingestion(duration_secs: f64, method: &str, chunks_created: usize, inserted: usize) {
    let method = method.to_string();
    counter!(INGESTIONS_TOTAL, "method" => method.clone()).increment(1);
    counter!(CHUNKS_CREATED, "method" => method.clone()).increment(chunks_created as u64);
    counter!(RECORDS_INSERTED, "method" => method.clone()).increment(inserted as u64);
    histogram!(INGESTION_DURATION, "method" => method).record(duration_secs);
}
