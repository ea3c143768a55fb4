//! Jobs and their results.
//!
//! A job is one (test, mode) pair. It goes through three shapes during a
//! run:
//!
//! ```text
//! PlannedJob ──stage──► BuildJob ──build──► BuildResult
//!  (test, mode)          + staged dir         + exit code
//!                        + environment        + combined output
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::environment::BuildEnvironment;
use crate::mode::BuildMode;
use crate::testcase::TestCase;

/// Identity of a job: `<mode>/<test>`.
///
/// The string form doubles as the job's path relative to the sandbox root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId {
    pub mode: BuildMode,
    pub test: String,
}

impl JobId {
    pub fn new(mode: BuildMode, test: impl Into<String>) -> Self {
        Self {
            mode,
            test: test.into(),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mode, self.test)
    }
}

/// A (test, mode) pair that survived the known-failures filter.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedJob {
    pub test: TestCase,
    pub mode: BuildMode,
}

impl PlannedJob {
    pub fn new(test: TestCase, mode: BuildMode) -> Self {
        Self { test, mode }
    }

    pub fn id(&self) -> JobId {
        JobId::new(self.mode, self.test.id.clone())
    }
}

/// A staged job, ready for its build script to run.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub id: JobId,
    pub staged_dir: PathBuf,
    pub env: BuildEnvironment,
}

/// Outcome of running a job's build script.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub job: JobId,

    /// Exit code of the build script; `-1` if it was killed by a signal.
    pub exit_code: i32,

    /// Standard output and standard error, interleaved in arrival order.
    pub output: String,

    pub duration: Duration,
}

impl BuildResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// The sources could not be staged; the build never started.
    Staging { job: JobId, message: String },

    /// The build script could not be started.
    Exec { job: JobId, message: String },

    /// The build script exited nonzero.
    Build(BuildResult),
}

impl JobFailure {
    pub fn job(&self) -> &JobId {
        match self {
            JobFailure::Staging { job, .. } | JobFailure::Exec { job, .. } => job,
            JobFailure::Build(result) => &result.job,
        }
    }

    /// Process exit code to propagate for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            JobFailure::Build(result) if result.exit_code > 0 => result.exit_code,
            _ => 1,
        }
    }

    /// Staging failures abort the run even when `keep_going` is set.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobFailure::Staging { .. })
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::Staging { job, message } => {
                write!(f, "Failed to stage {}: {}", job, message)
            }
            JobFailure::Exec { job, message } => {
                write!(f, "Failed to start build of {}: {}", job, message)
            }
            JobFailure::Build(result) => write!(
                f,
                "Failed to build {} (exit code {}):\n{}",
                result.job,
                result.exit_code,
                result.output.trim()
            ),
        }
    }
}

/// What a worker reports back for one job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The build script ran to completion (successfully or not).
    Built(BuildResult),

    /// The job failed before its build script exited.
    Failed(JobFailure),

    /// The known-failures table skipped the job at staging time.
    Excluded(JobId),

    /// An earlier mode of the same test failed and suppression is enabled.
    Suppressed(JobId),
}

impl JobOutcome {
    pub fn job(&self) -> &JobId {
        match self {
            JobOutcome::Built(result) => &result.job,
            JobOutcome::Failed(failure) => failure.job(),
            JobOutcome::Excluded(job) | JobOutcome::Suppressed(job) => job,
        }
    }

    /// Converts the outcome into a failure if it is one.
    pub fn failure(&self) -> Option<JobFailure> {
        match self {
            JobOutcome::Built(result) if !result.success() => {
                Some(JobFailure::Build(result.clone()))
            }
            JobOutcome::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }
}
