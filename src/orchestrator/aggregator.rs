//! Result aggregation.
//!
//! Outcomes arrive in completion order. By default the first failure ends
//! the run: the aggregator tells the caller to stop and keeps whatever had
//! already arrived. With `keep_going`, build failures are collected and the
//! run continues; staging failures still stop it.

use std::ops::ControlFlow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::{BuildResult, JobFailure, JobId, JobOutcome};

/// Everything known about a run once it stops.
///
/// There is no partial success: a single failure makes the run fail and the
/// sandbox is not packaged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Jobs handed to the worker pool.
    pub scheduled: usize,

    /// Build results that arrived, successful or not, in arrival order.
    pub completed: Vec<BuildResult>,

    /// Failures in arrival order. The first one decides the exit code.
    pub failures: Vec<JobFailure>,

    /// Pairs skipped by the known-failures table.
    pub skipped: Vec<JobId>,

    /// Jobs not built because an earlier mode of the same test failed.
    pub suppressed: Vec<JobId>,

    /// Whether the aggregator stopped the run after a failure.
    pub stopped_early: bool,

    /// When aggregation started.
    pub started_at: DateTime<Utc>,

    pub duration: Duration,

    /// Outcomes received for scheduled jobs.
    #[serde(skip)]
    reported: usize,
}

impl RunReport {
    /// True only if every scheduled job reported and none failed.
    pub fn success(&self) -> bool {
        self.failures.is_empty() && self.not_reported() == 0
    }

    /// Process exit code for the run: 0 on success, otherwise derived from
    /// the first failure.
    pub fn exit_code(&self) -> i32 {
        match self.failures.first() {
            Some(failure) => failure.exit_code(),
            None if self.not_reported() > 0 => 1,
            None => 0,
        }
    }

    /// Number of builds that exited successfully.
    pub fn passed(&self) -> usize {
        self.completed.iter().filter(|r| r.success()).count()
    }

    /// Scheduled jobs for which no outcome arrived.
    pub fn not_reported(&self) -> usize {
        self.scheduled.saturating_sub(self.reported)
    }
}

/// Collects [`JobOutcome`]s into a [`RunReport`].
pub struct ResultAggregator {
    keep_going: bool,
    report: RunReport,
}

impl ResultAggregator {
    /// Starts aggregating a run of `scheduled` jobs. `skipped` are the pairs
    /// the planner already dropped.
    pub fn new(scheduled: usize, skipped: Vec<JobId>, keep_going: bool) -> Self {
        Self {
            keep_going,
            report: RunReport {
                scheduled,
                skipped,
                started_at: Utc::now(),
                ..RunReport::default()
            },
        }
    }

    /// Records one outcome. Returns [`ControlFlow::Break`] when the run must
    /// stop taking new jobs.
    pub fn record(&mut self, outcome: JobOutcome) -> ControlFlow<()> {
        let failure = outcome.failure();
        self.report.reported += 1;

        match outcome {
            JobOutcome::Built(result) => self.report.completed.push(result),
            JobOutcome::Failed(_) => {}
            JobOutcome::Excluded(job) => self.report.skipped.push(job),
            JobOutcome::Suppressed(job) => self.report.suppressed.push(job),
        }

        let Some(failure) = failure else {
            return ControlFlow::Continue(());
        };
        let fatal = failure.is_fatal();
        self.report.failures.push(failure);

        if fatal || !self.keep_going {
            self.report.stopped_early = true;
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// The report so far.
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn finish(mut self, duration: Duration) -> RunReport {
        self.report.duration = duration;
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::BuildMode;

    fn built(test: &str, exit_code: i32) -> JobOutcome {
        JobOutcome::Built(BuildResult {
            job: JobId::new(BuildMode::Host, test),
            exit_code,
            output: format!("output of {}", test),
            duration: Duration::from_millis(5),
        })
    }

    #[test]
    fn test_all_pass() {
        let mut agg = ResultAggregator::new(2, vec![], false);
        assert!(agg.record(built("001-a", 0)).is_continue());
        assert!(agg.record(built("002-b", 0)).is_continue());

        let report = agg.finish(Duration::from_secs(1));
        assert!(report.success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.passed(), 2);
        assert_eq!(report.not_reported(), 0);
    }

    #[test]
    fn test_first_failure_stops_run() {
        let mut agg = ResultAggregator::new(3, vec![], false);
        assert!(agg.record(built("001-a", 0)).is_continue());
        assert!(agg.record(built("002-b", 2)).is_break());

        let report = agg.finish(Duration::ZERO);
        assert!(!report.success());
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].job().test, "002-b");
        // The result that arrived before the failure is kept.
        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.not_reported(), 1);
        assert!(report.stopped_early);
    }

    #[test]
    fn test_missing_outcomes_fail_the_run() {
        let mut agg = ResultAggregator::new(2, vec![], false);
        assert!(agg.record(built("001-a", 0)).is_continue());

        let report = agg.finish(Duration::ZERO);
        assert!(!report.success());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_keep_going_collects_all_failures() {
        let mut agg = ResultAggregator::new(3, vec![], true);
        assert!(agg.record(built("001-a", 1)).is_continue());
        assert!(agg.record(built("002-b", 0)).is_continue());
        assert!(agg.record(built("003-c", 4)).is_continue());

        let report = agg.finish(Duration::ZERO);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_staging_failure_is_fatal_with_keep_going() {
        let mut agg = ResultAggregator::new(2, vec![], true);
        let staging = JobOutcome::Failed(JobFailure::Staging {
            job: JobId::new(BuildMode::Jvm, "001-a"),
            message: "Sandbox directory exists".to_string(),
        });
        assert!(agg.record(staging).is_break());
        assert_eq!(agg.report().exit_code(), 1);
    }

    #[test]
    fn test_skips_and_suppressions_are_not_failures() {
        let planned = vec![JobId::new(BuildMode::Jvm, "001-a")];
        let mut agg = ResultAggregator::new(2, planned, true);
        assert!(
            agg.record(JobOutcome::Suppressed(JobId::new(BuildMode::Target, "002-b")))
                .is_continue()
        );
        assert!(agg.record(built("003-c", 0)).is_continue());

        let report = agg.finish(Duration::ZERO);
        assert!(report.success());
        assert!(!report.stopped_early);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.suppressed.len(), 1);
    }
}
