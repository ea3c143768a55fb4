//! Bounded worker pool.
//!
//! A fixed number of tokio tasks pull [`PlannedJob`]s from one shared FIFO
//! queue. Each worker takes a job through staging and building before it
//! takes the next, and reports progress as [`PoolEvent`]s on an unbounded
//! channel:
//!
//! ```text
//!              ┌──────────┐
//!   queue ───► │ worker 0 │ ──┐
//!   (FIFO)     ├──────────┤   │   PoolEvent::Started(job)
//!         ───► │ worker 1 │ ──┼─► PoolEvent::Finished(outcome) ──► aggregator
//!              ├──────────┤   │
//!         ───► │ worker N │ ──┘
//!              └──────────┘
//! ```
//!
//! Cancelling the token stops workers from taking new jobs. A build that is
//! already running is left to finish; its child process is never killed.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::environment::EnvironmentBuilder;
use crate::executor::JobRunner;
use crate::job::{BuildJob, JobFailure, JobId, JobOutcome, PlannedJob};
use crate::stager::SourceStager;

/// Progress reported by the pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A worker took the job and is about to stage it.
    Started(JobId),

    /// The job reached a final outcome.
    Finished(JobOutcome),
}

/// State shared by every worker of one run.
struct Shared {
    queue: Mutex<VecDeque<PlannedJob>>,
    /// Tests with a failed job, consulted only when suppression is enabled.
    failed_tests: Mutex<HashSet<String>>,
    stager: Arc<SourceStager>,
    environment: Arc<EnvironmentBuilder>,
    runner: Arc<dyn JobRunner>,
    suppress_later_modes: bool,
}

/// Runs planned jobs on a bounded number of workers.
pub struct WorkerPool {
    workers: usize,
    stager: Arc<SourceStager>,
    environment: Arc<EnvironmentBuilder>,
    runner: Arc<dyn JobRunner>,
    suppress_later_modes: bool,
}

impl WorkerPool {
    /// Creates a pool of `workers` workers (at least one).
    pub fn new(
        workers: usize,
        stager: Arc<SourceStager>,
        environment: Arc<EnvironmentBuilder>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            workers: workers.max(1),
            stager,
            environment,
            runner,
            suppress_later_modes: false,
        }
    }

    /// Once a job of a test fails, record the test's jobs that have not
    /// started yet as suppressed instead of building them.
    pub fn with_suppression(mut self, enabled: bool) -> Self {
        self.suppress_later_modes = enabled;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Starts the workers on `jobs` and returns the event stream.
    ///
    /// The stream ends once every worker has exited, i.e. when the queue is
    /// drained or `cancel` was triggered and in-flight jobs have reported.
    /// Dropping the receiver makes workers stop after their current job.
    pub fn spawn(
        &self,
        jobs: Vec<PlannedJob>,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<PoolEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = self.workers.min(jobs.len()).max(1);

        let shared = Arc::new(Shared {
            queue: Mutex::new(jobs.into()),
            failed_tests: Mutex::new(HashSet::new()),
            stager: self.stager.clone(),
            environment: self.environment.clone(),
            runner: self.runner.clone(),
            suppress_later_modes: self.suppress_later_modes,
        });

        debug!("Starting {} build workers", workers);
        for worker in 0..workers {
            let shared = shared.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                work(worker, shared, tx, cancel).await;
            });
        }

        rx
    }
}

async fn work(
    worker: usize,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<PoolEvent>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            debug!("Worker {} stopping: run cancelled", worker);
            break;
        }
        let Some(job) = shared.queue.lock().await.pop_front() else {
            break;
        };
        let id = job.id();

        if shared.suppress_later_modes && shared.failed_tests.lock().await.contains(&job.test.id) {
            debug!("Suppressing {}: an earlier mode failed", id);
            if tx.send(PoolEvent::Finished(JobOutcome::Suppressed(id))).is_err() {
                break;
            }
            continue;
        }

        if tx.send(PoolEvent::Started(id.clone())).is_err() {
            break;
        }
        let outcome = run_job(&shared, job).await;

        if shared.suppress_later_modes && outcome.failure().is_some() {
            shared.failed_tests.lock().await.insert(id.test.clone());
        }
        if tx.send(PoolEvent::Finished(outcome)).is_err() {
            break;
        }
    }
}

/// Stages and builds one job. Staging must finish before the build starts.
async fn run_job(shared: &Shared, job: PlannedJob) -> JobOutcome {
    let id = job.id();
    let stager = shared.stager.clone();
    let test = job.test.clone();
    let mode = job.mode;

    let staged = match tokio::task::spawn_blocking(move || stager.stage(&test, mode)).await {
        Ok(Ok(Some(dir))) => dir,
        Ok(Ok(None)) => return JobOutcome::Excluded(id),
        Ok(Err(e)) => {
            return JobOutcome::Failed(JobFailure::Staging {
                job: id,
                message: e.to_string(),
            });
        }
        Err(e) => {
            return JobOutcome::Failed(JobFailure::Staging {
                job: id,
                message: format!("staging task failed: {}", e),
            });
        }
    };

    let build = BuildJob {
        env: shared.environment.build(&job.test.id, job.mode),
        id,
        staged_dir: staged,
    };

    match shared.runner.run(&build).await {
        Ok(result) => JobOutcome::Built(result),
        Err(e) => {
            warn!("{}", e);
            JobOutcome::Failed(JobFailure::Exec {
                job: build.id,
                message: e.to_string(),
            })
        }
    }
}
