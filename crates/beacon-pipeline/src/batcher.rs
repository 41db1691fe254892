//! In-memory batching of validated records
//!
//! ```text
//! add_record ──→ ValidatorChain ──→ buffer (Mutex) ──→ BatchSink ──→ store queue
//!                                       ▲
//!                         flush timer ──┘ (every flush_interval since last flush)
//! ```
//!
//! A flush takes the whole buffer and submits it as one write. The write is
//! not awaited: if it fails the batch is discarded and the store serializer
//! logs a warning.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use beacon_core::config::BatchingConfig;
use beacon_core::domain::{LogRecord, SpanRecord};
use beacon_storage::{Pending, StoreHandle};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::validation::{ValidatorChain, Verdict};

/// Destination of flushed batches
pub trait BatchSink<R>: Send + Sync + 'static {
    /// Submits one batched write; the returned completion may be dropped
    fn write_batch(&self, batch: Vec<R>) -> Pending<()>;
}

impl BatchSink<LogRecord> for StoreHandle {
    fn write_batch(&self, batch: Vec<LogRecord>) -> Pending<()> {
        self.add_log_records(batch)
    }
}

impl BatchSink<SpanRecord> for StoreHandle {
    fn write_batch(&self, batch: Vec<SpanRecord>) -> Pending<()> {
        self.upsert_span_records(batch)
    }
}

/// Flush thresholds of one batcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Buffered records that trigger an immediate flush
    pub max_batch_size: usize,
    /// Time since the last flush after which the timer flushes
    pub flush_interval: Duration,
}

impl BatchLimits {
    pub fn for_logs(config: &BatchingConfig) -> Self {
        Self {
            max_batch_size: config.log_batch_size.max(1),
            flush_interval: config.flush_interval(),
        }
    }

    pub fn for_spans(config: &BatchingConfig) -> Self {
        Self {
            max_batch_size: config.span_batch_size.max(1),
            flush_interval: config.flush_interval(),
        }
    }
}

struct BatchState<R> {
    buffer: Vec<R>,
    last_flush: Instant,
    shut_down: bool,
}

struct Inner<R> {
    state: Mutex<BatchState<R>>,
    validators: ValidatorChain<R>,
    sink: Box<dyn BatchSink<R>>,
    limits: BatchLimits,
    kind: &'static str,
}

/// Buffers validated records and flushes them in batches
///
/// Cloning yields another handle to the same buffer.
pub struct Batcher<R> {
    inner: Arc<Inner<R>>,
}

/// Batcher for log records
pub type LogBatcher = Batcher<LogRecord>;

/// Batcher for finished spans
pub type SpanBatcher = Batcher<SpanRecord>;

impl<R> Clone for Batcher<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Send + 'static> Batcher<R> {
    /// Creates a batcher; `kind` names the record type in diagnostics
    pub fn new(
        kind: &'static str,
        sink: impl BatchSink<R>,
        validators: ValidatorChain<R>,
        limits: BatchLimits,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BatchState {
                    buffer: Vec::with_capacity(limits.max_batch_size),
                    last_flush: Instant::now(),
                    shut_down: false,
                }),
                validators,
                sink: Box::new(sink),
                limits,
                kind,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchState<R>> {
        // The buffer is only ever pushed to or taken whole, so a poisoned lock is still consistent
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates and buffers a record; never blocks on I/O
    ///
    /// No-op after [`shutdown`](Self::shutdown).
    pub fn add_record(&self, record: R) {
        if self.inner.validators.validate(&record) == Verdict::Drop {
            return;
        }

        let full_batch = {
            let mut state = self.lock();
            if state.shut_down {
                tracing::debug!(kind = self.inner.kind, "Batcher shut down, record ignored");
                return;
            }
            state.buffer.push(record);
            if state.buffer.len() >= self.inner.limits.max_batch_size {
                state.last_flush = Instant::now();
                Some(std::mem::take(&mut state.buffer))
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            tracing::debug!(kind = self.inner.kind, count = batch.len(), "Batch full, flushing");
            drop(self.inner.sink.write_batch(batch));
        }
    }

    /// Flushes the buffer now
    ///
    /// Returns the completion of the submitted write, or `None` when the
    /// buffer was empty.
    pub fn flush(&self) -> Option<Pending<()>> {
        let batch = {
            let mut state = self.lock();
            state.last_flush = Instant::now();
            std::mem::take(&mut state.buffer)
        };
        self.submit(batch)
    }

    /// Flushes one last time and stops accepting records
    ///
    /// Idempotent; only the first call flushes.
    pub fn shutdown(&self) -> Option<Pending<()>> {
        let batch = {
            let mut state = self.lock();
            if state.shut_down {
                return None;
            }
            state.shut_down = true;
            std::mem::take(&mut state.buffer)
        };

        tracing::debug!(kind = self.inner.kind, count = batch.len(), "Batcher shutting down");
        self.submit(batch)
    }

    fn submit(&self, batch: Vec<R>) -> Option<Pending<()>> {
        if batch.is_empty() {
            return None;
        }
        tracing::trace!(kind = self.inner.kind, count = batch.len(), "Flushing batch");
        Some(self.inner.sink.write_batch(batch))
    }

    /// Number of records waiting for the next flush
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    pub fn limits(&self) -> BatchLimits {
        self.inner.limits
    }

    /// Spawns the interval flush task
    ///
    /// The task flushes whenever `flush_interval` has elapsed since the
    /// last flush, and exits on cancellation or once the batcher is shut
    /// down.
    pub fn spawn_flush_timer(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let batcher = self.clone();
        tokio::spawn(async move {
            tracing::debug!(kind = batcher.inner.kind, "Flush timer started");
            loop {
                let deadline = batcher.lock().last_flush + batcher.inner.limits.flush_interval;

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(deadline) => {
                        if batcher.is_shut_down() {
                            break;
                        }
                        let due = batcher.lock().last_flush.elapsed() >= batcher.inner.limits.flush_interval;
                        if due {
                            drop(batcher.flush());
                        }
                    }
                }
            }
            tracing::debug!(kind = batcher.inner.kind, "Flush timer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::domain::{LogSeverity, ProcessId, SpanKind, SpanStatus};
    use beacon_storage::{LogFilter, SpanFilter, TelemetryStore, WriteSerializer};
    use chrono::Utc;

    use super::*;
    use crate::validation::BodyLengthValidator;

    fn log(body: &str) -> LogRecord {
        LogRecord::new(ProcessId::new(), LogSeverity::Info, body, Utc::now())
    }

    async fn batcher(max_batch_size: usize, flush_interval: Duration) -> (LogBatcher, StoreHandle) {
        let store = TelemetryStore::in_memory().await.unwrap();
        let (handle, _task) = WriteSerializer::spawn(store);
        let batcher = Batcher::new(
            "log",
            handle.clone(),
            ValidatorChain::new().with(BodyLengthValidator::new(10)),
            BatchLimits {
                max_batch_size,
                flush_interval,
            },
        );
        (batcher, handle)
    }

    async fn stored(handle: &StoreHandle) -> usize {
        handle.fetch_logs(LogFilter::new()).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_flushes_when_full() {
        let (batcher, handle) = batcher(3, Duration::from_secs(3600)).await;

        batcher.add_record(log("a"));
        batcher.add_record(log("b"));
        assert_eq!(batcher.buffered_len(), 2);
        assert_eq!(stored(&handle).await, 0);

        batcher.add_record(log("c"));
        assert_eq!(batcher.buffered_len(), 0);
        assert_eq!(stored(&handle).await, 3);
    }

    #[tokio::test]
    async fn test_invalid_records_never_reach_the_store() {
        let (batcher, handle) = batcher(1, Duration::from_secs(3600)).await;

        batcher.add_record(log("this body is far too long"));
        assert_eq!(batcher.buffered_len(), 0);
        assert_eq!(stored(&handle).await, 0);
    }

    #[tokio::test]
    async fn test_explicit_flush() {
        let (batcher, handle) = batcher(100, Duration::from_secs(3600)).await;
        assert!(batcher.flush().is_none());

        batcher.add_record(log("x"));
        batcher.flush().unwrap().await.unwrap();
        assert_eq!(stored(&handle).await, 1);
    }

    #[tokio::test]
    async fn test_timer_flushes_after_interval() {
        let (batcher, handle) = batcher(100, Duration::from_millis(50)).await;
        let cancel = CancellationToken::new();
        let timer = batcher.spawn_flush_timer(cancel.clone());

        batcher.add_record(log("tick"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(batcher.buffered_len(), 0);
        assert_eq!(stored(&handle).await, 1);

        cancel.cancel();
        timer.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_then_ignores_records() {
        let (batcher, handle) = batcher(100, Duration::from_secs(3600)).await;
        batcher.add_record(log("last"));

        batcher.shutdown().unwrap().await.unwrap();
        assert!(batcher.shutdown().is_none());

        batcher.add_record(log("late"));
        assert_eq!(batcher.buffered_len(), 0);
        assert_eq!(stored(&handle).await, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_is_discarded() {
        let (batcher, handle) = batcher(100, Duration::from_secs(3600)).await;
        let dup = log("dup");
        handle.add_log_record(dup.clone()).await.unwrap();

        batcher.add_record(log("ok"));
        batcher.add_record(dup);
        assert!(batcher.flush().unwrap().await.is_err());

        // The whole batch was rolled back and nothing is retried
        assert_eq!(batcher.buffered_len(), 0);
        assert_eq!(stored(&handle).await, 1);
    }

    #[tokio::test]
    async fn test_span_batch_completes_in_flight_rows() {
        let store = TelemetryStore::in_memory().await.unwrap();
        let (handle, _task) = WriteSerializer::spawn(store);
        let batcher: SpanBatcher = Batcher::new(
            "span",
            handle.clone(),
            ValidatorChain::new(),
            BatchLimits {
                max_batch_size: 100,
                flush_interval: Duration::from_secs(3600),
            },
        );

        let mut in_flight = SpanRecord::new("upload", SpanKind::Client, ProcessId::new(), Utc::now());
        handle.upsert_span_record(in_flight.clone()).await.unwrap();
        in_flight.finish(Utc::now(), SpanStatus::Ok).unwrap();
        let mut other = SpanRecord::new("render", SpanKind::Internal, ProcessId::new(), Utc::now());
        other.finish(Utc::now(), SpanStatus::Ok).unwrap();

        batcher.add_record(in_flight.clone());
        batcher.add_record(other.clone());
        batcher.flush().unwrap().await.unwrap();

        let finished = handle
            .fetch_spans(SpanFilter::new().with_finished(true))
            .await
            .unwrap();
        assert_eq!(finished.len(), 2);
    }
}
