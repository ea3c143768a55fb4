//! Build planning and orchestration.
//!
//! # Architecture
//!
//! ```text
//!  Vec<TestCase> × modes
//!       │
//!       │ plan()  ── KnownFailures ──► skipped pairs
//!       ▼
//!  Plan { jobs: Vec<PlannedJob> }
//!       │
//!       │ Orchestrator::run()
//!       ▼
//!  WorkerPool ── stage ──► SourceStager
//!       │      ── env ────► EnvironmentBuilder
//!       │      ── build ──► JobRunner
//!       │
//!       │ PoolEvent stream (completion order)
//!       ▼
//!  ResultAggregator ──► RunReport ──► Reporter
//! ```
//!
//! The orchestrator never deletes the sandbox and never packages it; both
//! are left to the caller (see [`crate::pipeline`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtbuild::config::load_config;
//! use rtbuild::environment::EnvironmentBuilder;
//! use rtbuild::exclusion::KnownFailures;
//! use rtbuild::executor::ScriptRunner;
//! use rtbuild::mode::BuildMode;
//! use rtbuild::orchestrator::{Orchestrator, WorkerPool, plan};
//! use rtbuild::report::ConsoleReporter;
//! use rtbuild::sandbox::SandboxLayout;
//! use rtbuild::stager::SourceStager;
//! use rtbuild::testcase;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("rtbuild.toml"))?;
//!     let known = Arc::new(KnownFailures::empty());
//!     let tests = testcase::discover(&config.tests_dir())?;
//!     let plan = plan(tests, &BuildMode::ALL, &known);
//!
//!     let layout = SandboxLayout::create(config.sandbox_root())?;
//!     let stager = SourceStager::new(layout, config.default_scripts_dir(), known);
//!     let pool = WorkerPool::new(
//!         config.max_parallel(),
//!         Arc::new(stager),
//!         Arc::new(EnvironmentBuilder::new(&config)?),
//!         Arc::new(ScriptRunner::new()),
//!     );
//!
//!     let orchestrator = Orchestrator::new(pool, ConsoleReporter::new(false), false);
//!     let report = orchestrator.run(&plan).await;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod aggregator;
pub mod pool;

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::exclusion::KnownFailures;
use crate::job::{JobId, PlannedJob};
use crate::mode::BuildMode;
use crate::report::Reporter;
use crate::testcase::TestCase;

pub use aggregator::{ResultAggregator, RunReport};
pub use pool::{PoolEvent, WorkerPool};

/// The jobs of a run, decided before anything is staged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    /// Jobs to build, mode by mode in the order the modes were requested,
    /// tests in id order within a mode.
    pub jobs: Vec<PlannedJob>,

    /// Pairs dropped by the known-failures table.
    pub skipped: Vec<JobId>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Crosses `tests` with `modes` and removes the known build failures.
///
/// Repeated modes are only planned once.
pub fn plan(tests: Vec<TestCase>, modes: &[BuildMode], known_failures: &KnownFailures) -> Plan {
    let mut seen = Vec::new();
    let mut plan = Plan::default();

    for &mode in modes {
        if seen.contains(&mode) {
            continue;
        }
        seen.push(mode);

        for test in &tests {
            if known_failures.should_skip(&test.id, mode) {
                plan.skipped.push(JobId::new(mode, test.id.clone()));
            } else {
                plan.jobs.push(PlannedJob::new(test.clone(), mode));
            }
        }
    }

    plan
}

/// Drives a [`Plan`] through the worker pool and aggregates the outcomes.
pub struct Orchestrator<R> {
    pool: WorkerPool,
    reporter: R,
    keep_going: bool,
}

impl<R: Reporter> Orchestrator<R> {
    /// `keep_going` keeps building after build failures instead of stopping
    /// at the first one.
    pub fn new(pool: WorkerPool, reporter: R, keep_going: bool) -> Self {
        Self {
            pool,
            reporter,
            keep_going,
        }
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Runs every job of `plan` and returns the aggregated report.
    ///
    /// In fail-fast mode this returns as soon as the first failure arrives,
    /// without waiting for builds that are still running.
    pub async fn run(&self, plan: &Plan) -> RunReport {
        let start = Instant::now();
        self.reporter.on_plan(plan).await;

        let mut aggregator =
            ResultAggregator::new(plan.jobs.len(), plan.skipped.clone(), self.keep_going);

        if plan.is_empty() {
            warn!("No jobs to build");
        } else {
            info!(
                "Building {} jobs on {} workers ({} skipped as known failures)",
                plan.jobs.len(),
                self.pool.workers(),
                plan.skipped.len()
            );

            let cancel = CancellationToken::new();
            let mut events = self.pool.spawn(plan.jobs.clone(), cancel.clone());

            while let Some(event) = events.recv().await {
                match event {
                    PoolEvent::Started(job) => self.reporter.on_job_start(&job).await,
                    PoolEvent::Finished(outcome) => {
                        self.reporter.on_job_complete(&outcome).await;
                        if aggregator.record(outcome).is_break() {
                            warn!("Stopping the run after a failure; builds in flight are left running");
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
        }

        let report = aggregator.finish(start.elapsed());
        self.reporter.on_run_complete(&report).await;
        report
    }
}
