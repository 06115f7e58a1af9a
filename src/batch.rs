//! Batch ingestion.
//!
//! [`BatchDriver`] feeds records from any source (usually a
//! [`crate::MarcReader`]) through a bounded channel to a pool of worker
//! threads, each calling [`Orchestrator::ingest`]. Records are independent,
//! so workers need no coordination beyond the datastore's atomic primitives.
//!
//! - The datastore is pinged before anything is read; an unreachable backend
//!   fails the batch with [`IngestError::BackendUnavailable`].
//! - A record whose datastore call timed out is set aside and run again in a
//!   later pass, up to [`BatchConfig::max_requeues`] times.
//! - A fatal error (see [`IngestError::is_fatal`]) stops the batch: no new
//!   records are started, in-flight ones finish, and the error is returned.
//! - [`StopHandle::stop`] does the same on request, without an error.

use crate::config::BatchConfig;
use crate::error::{IngestError, Result};
use crate::orchestrator::Orchestrator;
use crate::record::Record;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Cooperative stop signal for a running batch.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Stop issuing new records. In-flight records finish.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts from a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records ingested
    pub processed: usize,
    /// Records aborted (including timeouts past the requeue limit)
    pub failed: usize,
    /// Input records that could not be read
    pub skipped: usize,
    /// Times a record was set aside for another pass
    pub requeued: usize,
    /// Whether the batch ended on a stop request
    pub stopped: bool,
}

type ProgressFn = dyn Fn(usize) + Send + Sync;

#[derive(Default)]
struct Shared {
    processed: AtomicUsize,
    failed: AtomicUsize,
    finished: AtomicUsize,
    requeued: AtomicUsize,
    aborted: AtomicBool,
    fatal: Mutex<Option<IngestError>>,
    retry: Mutex<Vec<Record>>,
}

/// Runs an [`Orchestrator`] over a stream of records on a worker pool.
pub struct BatchDriver<'o> {
    orchestrator: &'o Orchestrator,
    config: BatchConfig,
    stop: StopHandle,
    progress: Option<Box<ProgressFn>>,
}

impl fmt::Debug for BatchDriver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchDriver")
            .field("config", &self.config)
            .field("stopped", &self.stop.is_stopped())
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl<'o> BatchDriver<'o> {
    /// Create a driver.
    #[must_use]
    pub fn new(orchestrator: &'o Orchestrator, config: BatchConfig) -> Self {
        BatchDriver {
            orchestrator,
            config,
            stop: StopHandle::default(),
            progress: None,
        }
    }

    /// Also report progress to `callback` with the number of finished
    /// records. Called from worker threads; it must not block.
    #[must_use]
    pub fn with_progress(mut self, callback: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// A handle that stops this driver's batches.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ingest every record of `records`.
    ///
    /// Unreadable input records are logged and counted as skipped.
    ///
    /// # Errors
    ///
    /// [`IngestError::BackendUnavailable`] if the datastore does not answer
    /// before the batch starts, or the first fatal error raised by a record.
    pub fn run<I>(&self, records: I) -> Result<BatchReport>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        if let Err(e) = self.orchestrator.datastore().ping() {
            tracing::error!(error = %e, "datastore unavailable; batch not started");
            return Err(IngestError::BackendUnavailable(e.to_string()));
        }
        tracing::info!(workers = self.config.workers, "batch started");

        let shared = Shared::default();
        let mut skipped = 0;
        self.run_pass(&shared, 0, |tx| {
            for item in records {
                if self.halted(&shared) {
                    break;
                }
                match item {
                    Ok(record) => {
                        if tx.send(record).is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        skipped += 1;
                        tracing::warn!(error = %e, "skipping unreadable record");
                    },
                }
            }
        });

        for attempt in 1..=self.config.max_requeues {
            let retry = std::mem::take(
                &mut *shared.retry.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if retry.is_empty() || self.halted(&shared) {
                shared.retry.lock().unwrap_or_else(PoisonError::into_inner).extend(retry);
                break;
            }
            tracing::info!(records = retry.len(), attempt, "running requeued records");
            self.run_pass(&shared, attempt, |tx| {
                for record in retry {
                    if self.halted(&shared) || tx.send(record).is_err() {
                        break;
                    }
                }
            });
        }

        let leftover = shared
            .retry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let report = BatchReport {
            processed: shared.processed.load(Ordering::SeqCst),
            failed: shared.failed.load(Ordering::SeqCst) + leftover,
            skipped,
            requeued: shared.requeued.load(Ordering::SeqCst),
            stopped: self.stop.is_stopped(),
        };

        if let Some(fatal) = shared
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            tracing::error!(
                processed = report.processed,
                failed = report.failed,
                error = %fatal,
                "batch stopped on fatal error"
            );
            return Err(fatal);
        }
        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            requeued = report.requeued,
            stopped = report.stopped,
            "batch finished"
        );
        Ok(report)
    }

    fn halted(&self, shared: &Shared) -> bool {
        self.stop.is_stopped() || shared.aborted.load(Ordering::SeqCst)
    }

    /// One pool run: `feed` sends records on the calling thread while the
    /// workers drain the channel.
    fn run_pass(&self, shared: &Shared, attempt: u32, feed: impl FnOnce(&Sender<Record>)) {
        let (tx, rx) = bounded(self.config.channel_capacity.max(1));
        thread::scope(|scope| {
            for _ in 0..self.config.workers.max(1) {
                let rx = rx.clone();
                scope.spawn(move || self.worker(&rx, shared, attempt));
            }
            drop(rx);
            feed(&tx);
            drop(tx);
        });
    }

    fn worker(&self, rx: &Receiver<Record>, shared: &Shared, attempt: u32) {
        for record in rx {
            if self.halted(shared) {
                continue;
            }
            match self.orchestrator.ingest(&record) {
                Ok(_) => {
                    shared.processed.fetch_add(1, Ordering::SeqCst);
                    self.finished(shared);
                },
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "fatal error; stopping batch");
                    shared.aborted.store(true, Ordering::SeqCst);
                    let mut fatal = shared.fatal.lock().unwrap_or_else(PoisonError::into_inner);
                    if fatal.is_none() {
                        *fatal = Some(e);
                    }
                },
                Err(e) if e.is_timeout() && attempt < self.config.max_requeues => {
                    tracing::warn!(
                        error = %e,
                        control_number = record.control_number().unwrap_or(""),
                        "record timed out; requeued"
                    );
                    shared.requeued.fetch_add(1, Ordering::SeqCst);
                    shared
                        .retry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(record);
                },
                Err(e) => {
                    tracing::warn!(error = %e, "record failed");
                    shared.failed.fetch_add(1, Ordering::SeqCst);
                    self.finished(shared);
                },
            }
        }
    }

    fn finished(&self, shared: &Shared) {
        let done = shared.finished.fetch_add(1, Ordering::SeqCst) + 1;
        let interval = self.config.progress_interval;
        if interval != 0 && done % interval == 0 {
            tracing::info!(records = done, "ingest progress");
            if let Some(callback) = &self.progress {
                callback(done);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::entity::Profiles;
    use crate::leader::Leader;
    use crate::record::Field;
    use crate::store::{Datastore, MemoryStore};

    fn records(n: usize) -> Vec<Result<Record>> {
        (0..n)
            .map(|i| {
                Ok(Record::builder(Leader::default())
                    .control_field_str("001", &format!("rec{i}"))
                    .field(
                        Field::builder("245".to_string(), '0', '0')
                            .subfield_str('a', &format!("Title {i}"))
                            .build(),
                    )
                    .build())
            })
            .collect()
    }

    fn orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
        Orchestrator::new(store, Profiles::standard().unwrap(), IngestConfig::default())
    }

    #[test]
    fn test_run_counts_and_skips() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store.clone());
        let driver = BatchDriver::new(&orchestrator, BatchConfig::new().with_workers(3));

        let mut input = records(20);
        input.insert(5, Err(IngestError::InvalidLeader("bad".to_string())));
        let report = driver.run(input).unwrap();

        assert_eq!(report.processed, 20);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(store.smembers("rdaCore:Works").unwrap().len(), 20);
        assert_eq!(store.get("global:rdaCore").unwrap().as_deref(), Some("20"));
    }

    #[test]
    fn test_progress_callback() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let driver = BatchDriver::new(
            &orchestrator,
            BatchConfig::new().with_workers(1).with_progress_interval(4),
        )
        .with_progress(move |n| sink.lock().unwrap().push(n));

        driver.run(records(10)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![4, 8]);
    }

    #[test]
    fn test_progress_reports_each_count_once() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let driver = BatchDriver::new(
            &orchestrator,
            BatchConfig::new().with_workers(4).with_progress_interval(1),
        )
        .with_progress(move |n| sink.lock().unwrap().push(n));

        driver.run(records(40)).unwrap();
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (1..=40).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_before_run_processes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store.clone());
        let driver = BatchDriver::new(&orchestrator, BatchConfig::new().with_workers(2));
        driver.stop_handle().stop();

        let report = driver.run(records(5)).unwrap();
        assert!(report.stopped);
        assert_eq!(report.processed, 0);
        assert_eq!(store.get("global:rdaCore").unwrap(), None);
    }
}
