//! Sandbox layout.
//!
//! All staged tests of a run live below a single root:
//!
//! ```text
//! <root>/
//! ├── host/
//! │   ├── 001-HelloWorld/
//! │   └── 002-sleep/
//! ├── target/
//! │   └── 001-HelloWorld/
//! └── jvm/
//!     └── 002-sleep/
//! ```
//!
//! The directory of a job is a pure function of its (mode, test) pair. Mode
//! names are fixed and test ids are single path components, so two distinct
//! jobs can never share (or nest inside) each other's directory. Workers rely
//! on this to stage and build without any locking.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::job::JobId;
use crate::mode::BuildMode;

/// Errors raised while preparing the sandbox root.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The root exists and already holds files from an earlier run.
    #[error("Sandbox root {0} is not empty; each run needs a fresh sandbox")]
    NotEmpty(PathBuf),

    #[error("Failed to prepare sandbox root {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Deterministic per-job directory layout below a sandbox root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLayout {
    root: PathBuf,
}

impl SandboxLayout {
    /// Describes a layout without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root directory for a new run.
    ///
    /// The root may already exist but must be empty: staged trees are never
    /// reused across runs. The orchestrator does not remove the root
    /// afterwards; that is up to the caller.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let root = root.into();
        let io_err = |source| SandboxError::Io {
            path: root.clone(),
            source,
        };

        if root.exists() {
            let mut entries = std::fs::read_dir(&root).map_err(io_err)?;
            if entries.next().is_some() {
                return Err(SandboxError::NotEmpty(root));
            }
        } else {
            std::fs::create_dir_all(&root).map_err(io_err)?;
        }

        debug!("Sandbox root ready at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every job of `mode`.
    pub fn mode_dir(&self, mode: BuildMode) -> PathBuf {
        self.root.join(mode.as_str())
    }

    /// Directory a job is staged into: `<root>/<mode>/<test>`.
    pub fn job_dir(&self, job: &JobId) -> PathBuf {
        self.mode_dir(job.mode).join(&job.test)
    }
}
