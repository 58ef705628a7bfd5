//! Bounded thread pool for subject processing.
//!
//! Subjects share nothing mutable, so each is processed start to finish on
//! one worker. The pool is fed from a bounded channel; submission blocks
//! while the queue is full, which keeps a fast data source from buffering
//! the whole dataset in memory.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::RuntimeConfig;
use crate::engine::{CancellationToken, DataSource, DerivationEngine, QueryResultsHandler, RunReport, Subject};
use crate::error::{EpisodicError, EpisodicResult, ExecutionError};

enum Job {
    Process {
        subject: Subject,
        handler: Arc<dyn QueryResultsHandler>,
        cancel: CancellationToken,
        reply: Sender<Outcome>,
    },

    #[cfg(test)]
    Sleep { duration: Duration, reply: Sender<()> },
}

struct Outcome {
    key: String,
    result: EpisodicResult<usize>,
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(workers: usize, queue_capacity: usize, engine: Arc<DerivationEngine>) -> EpisodicResult<Self> {
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(&engine);
            let handle = thread::Builder::new()
                .name(format!("episodic-worker-{idx}"))
                .spawn(move || worker_loop(&rx, &engine))
                .map_err(|e| EpisodicError::internal(format!("failed to spawn worker {idx}: {e}")))?;
            handles.push(handle);
        }
        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    /// Queues a job, waiting while the queue is full.
    fn submit(&self, job: Job) -> EpisodicResult<()> {
        self.tx
            .send(job)
            .map_err(|_| ExecutionError::Disconnected.into())
    }

    /// Queues a job only if there is room.
    fn try_submit(&self, job: Job) -> EpisodicResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    fn shutdown(self) {
        // Workers drain queued jobs, then see the channel close.
        drop(self.tx);
        for handle in self.workers {
            let name = handle.thread().name().unwrap_or("episodic-worker").to_string();
            if let Err(payload) = handle.join() {
                tracing::error!(worker = %name, reason = %panic_reason(payload.as_ref()), "worker panicked");
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Job>, engine: &DerivationEngine) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Process {
                subject,
                handler,
                cancel,
                reply,
            } => {
                let key = subject.key.clone();
                let result: EpisodicResult<usize> = if cancel.is_cancelled() {
                    Err(ExecutionError::Cancelled { key: key.clone() }.into())
                } else {
                    // A panic, in the engine or in the handler, fails this subject only.
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        engine.process_and_handle(subject, handler.as_ref(), &cancel)
                    }))
                    .unwrap_or_else(|payload| {
                        let reason = panic_reason(payload.as_ref());
                        tracing::error!(key = %key, reason = %reason, "subject processing panicked");
                        Err(super::subject_failed(&key, format!("panicked: {reason}")))
                    })
                };
                if reply.send(Outcome { key, result }).is_err() {
                    tracing::debug!("outcome dropped; no one is waiting for it");
                }
            }

            #[cfg(test)]
            Job::Sleep { duration, reply } => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Processes subjects of a data source on a pool of worker threads.
pub struct SubjectRuntime {
    engine: Arc<DerivationEngine>,
    pool: Option<WorkerPool>,
}

impl std::fmt::Debug for SubjectRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectRuntime")
            .field("engine", &self.engine)
            .field("workers", &self.pool.as_ref().map_or(0, |p| p.workers.len()))
            .finish()
    }
}

impl SubjectRuntime {
    /// Starts `config.workers` threads.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for an invalid config, or an
    /// internal error if a thread cannot be spawned.
    pub fn new(engine: DerivationEngine, config: RuntimeConfig) -> EpisodicResult<Self> {
        let config = config.validate()?;
        let engine = Arc::new(engine);
        let pool = WorkerPool::start(config.workers, config.queue_capacity, Arc::clone(&engine))?;
        Ok(Self {
            engine,
            pool: Some(pool),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &DerivationEngine {
        &self.engine
    }

    fn pool(&self) -> EpisodicResult<&WorkerPool> {
        self.pool.as_ref().ok_or_else(|| ExecutionError::Disconnected.into())
    }

    /// Processes every subject of `source`.
    ///
    /// Subject-local failures are recorded in the report. The first failure
    /// in shared state cancels the subjects still queued or running and is
    /// returned once they have stopped. Cancelling `cancel` stops the run
    /// between firings; unfinished subjects are listed as cancelled.
    pub fn run(
        &self,
        source: &mut dyn DataSource,
        handler: Arc<dyn QueryResultsHandler>,
        cancel: &CancellationToken,
    ) -> EpisodicResult<RunReport> {
        let pool = self.pool()?;
        let run_cancel = cancel.child();
        let (reply_tx, reply_rx) = unbounded::<Outcome>();
        let mut report = RunReport::default();
        let mut outstanding = 0usize;
        let mut abort: Option<EpisodicError> = None;

        let settle = |outcome: Outcome, report: &mut RunReport, abort: &mut Option<EpisodicError>| {
            if let Err(e) = report.record(outcome.key, outcome.result) {
                if abort.is_none() {
                    run_cancel.cancel();
                    *abort = Some(e);
                }
            }
        };

        while abort.is_none() {
            while let Ok(outcome) = reply_rx.try_recv() {
                outstanding -= 1;
                settle(outcome, &mut report, &mut abort);
            }
            if abort.is_some() {
                break;
            }
            let Some(next) = source.next_subject() else {
                break;
            };
            let subject = match next {
                Ok(subject) => subject,
                Err(e) => {
                    settle(
                        Outcome {
                            key: "<unreadable>".to_string(),
                            result: Err(e),
                        },
                        &mut report,
                        &mut abort,
                    );
                    continue;
                }
            };
            if run_cancel.is_cancelled() {
                report.cancelled.push(subject.key);
                continue;
            }
            pool.submit(Job::Process {
                subject,
                handler: Arc::clone(&handler),
                cancel: run_cancel.clone(),
                reply: reply_tx.clone(),
            })?;
            outstanding += 1;
        }

        // Queued jobs hold the remaining senders, so a lost reply surfaces
        // as `Disconnected` instead of a hang.
        drop(reply_tx);
        while outstanding > 0 {
            let outcome = reply_rx.recv().map_err(|_| EpisodicError::from(ExecutionError::Disconnected))?;
            outstanding -= 1;
            settle(outcome, &mut report, &mut abort);
        }

        match abort {
            Some(e) => Err(e),
            None => {
                tracing::info!(
                    completed = report.completed,
                    derived = report.derived,
                    failed = report.failures.len(),
                    cancelled = report.cancelled.len(),
                    "run finished"
                );
                Ok(report)
            }
        }
    }

    /// Queues one subject without waiting for room and returns a handle on
    /// its outcome.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::QueueFull` if the queue is at capacity.
    pub fn try_process(
        &self,
        subject: Subject,
        handler: Arc<dyn QueryResultsHandler>,
        cancel: &CancellationToken,
    ) -> EpisodicResult<SubjectHandle> {
        let (tx, rx) = bounded::<Outcome>(1);
        let key = subject.key.clone();
        self.pool()?.try_submit(Job::Process {
            subject,
            handler,
            cancel: cancel.clone(),
            reply: tx,
        })?;
        Ok(SubjectHandle { key, rx })
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> EpisodicResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.pool()?.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for SubjectRuntime {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

/// Pending outcome of a subject queued with [`SubjectRuntime::try_process`].
#[derive(Debug)]
pub struct SubjectHandle {
    key: String,
    rx: Receiver<Outcome>,
}

impl SubjectHandle {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the subject to finish; returns its derived count.
    pub fn join(self) -> EpisodicResult<usize> {
        self.rx
            .recv()
            .map_err(|_| EpisodicError::from(ExecutionError::Disconnected))?
            .result
    }

    /// Waits at most `timeout` for the subject to finish.
    pub fn join_timeout(self, timeout: Duration) -> EpisodicResult<usize> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => EpisodicError::from(ExecutionError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
                RecvTimeoutError::Disconnected => ExecutionError::Disconnected.into(),
            })?
            .result
    }
}
