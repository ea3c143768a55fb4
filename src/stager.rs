//! Source staging.
//!
//! Before a test can be built, its source directory is copied into the job's
//! sandbox directory and the lifecycle scripts are installed next to it:
//!
//! - A test without its own `build`/`run`/`check` gets the shared
//!   `default-<name>` script installed under `<name>`.
//! - A test with a custom script keeps it, and the shared default is copied
//!   beside it as `default-<name>` so the custom script can delegate to it.
//!
//! Shared defaults may come from a store that does not keep executable bits,
//! so every installed script is explicitly made `rwxr-xr-x`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use crate::exclusion::KnownFailures;
use crate::job::JobId;
use crate::mode::BuildMode;
use crate::sandbox::SandboxLayout;
use crate::testcase::TestCase;

/// Names of the scripts every staged test exposes.
pub const LIFECYCLE_SCRIPTS: [&str; 3] = ["build", "run", "check"];

/// Errors raised while staging a test.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// The test's source directory does not exist or is not a directory.
    #[error("Test source directory {0} does not exist")]
    SourceMissing(PathBuf),

    /// The destination is already populated.
    #[error("Sandbox directory {0} already exists")]
    DestinationExists(PathBuf),

    /// A shared default lifecycle script is missing.
    #[error("Default script {0} does not exist")]
    DefaultScriptMissing(PathBuf),

    /// Walking the source tree failed.
    #[error("Failed to read test sources: {0}")]
    Walk(#[from] walkdir::Error),

    /// Copying or chmod failed.
    #[error("Failed to stage {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StagingError + '_ {
    move |source| StagingError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Name under which a shared default script is installed.
pub fn default_script_name(name: &str) -> String {
    format!("default-{}", name)
}

/// Copies tests into their sandbox directories.
pub struct SourceStager {
    layout: SandboxLayout,
    default_scripts_dir: PathBuf,
    known_failures: Arc<KnownFailures>,
}

impl SourceStager {
    /// Creates a stager writing below `layout`, taking shared scripts from
    /// `default_scripts_dir`.
    pub fn new(
        layout: SandboxLayout,
        default_scripts_dir: impl Into<PathBuf>,
        known_failures: Arc<KnownFailures>,
    ) -> Self {
        Self {
            layout,
            default_scripts_dir: default_scripts_dir.into(),
            known_failures,
        }
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    /// Stages `test` for `mode`.
    ///
    /// Returns `Ok(None)` without touching the filesystem if the pair is a
    /// known build failure, otherwise the staged directory.
    ///
    /// # Errors
    ///
    /// Fails if the source directory is missing, the destination already
    /// exists, a shared default script is missing, or any copy fails.
    pub fn stage(&self, test: &TestCase, mode: BuildMode) -> Result<Option<PathBuf>, StagingError> {
        if self.known_failures.should_skip(&test.id, mode) {
            debug!("Not staging {}/{}: known build failure", mode, test.id);
            return Ok(None);
        }

        if !test.source_dir.is_dir() {
            return Err(StagingError::SourceMissing(test.source_dir.clone()));
        }

        let dst = self.layout.job_dir(&JobId::new(mode, test.id.clone()));
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        // A job directory is created exactly once per run.
        match fs::create_dir(&dst) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StagingError::DestinationExists(dst));
            }
            Err(e) => return Err(io_error(&dst)(e)),
        }

        copy_tree(&test.source_dir, &dst)?;
        self.install_scripts(&dst)?;

        debug!("Staged {} into {}", test.id, dst.display());
        Ok(Some(dst))
    }

    fn install_scripts(&self, dst: &Path) -> Result<(), StagingError> {
        for name in LIFECYCLE_SCRIPTS {
            let default = self.default_scripts_dir.join(default_script_name(name));
            if !default.is_file() {
                return Err(StagingError::DefaultScriptMissing(default));
            }

            let script = dst.join(name);
            if script.exists() {
                let beside = dst.join(default_script_name(name));
                fs::copy(&default, &beside).map_err(io_error(&beside))?;
                make_executable(&beside)?;
            } else {
                fs::copy(&default, &script).map_err(io_error(&script))?;
            }
            make_executable(&script)?;
        }
        Ok(())
    }
}

/// Recursively copies the contents of `src` into the existing directory
/// `dst`. Symlinks are followed, so the copy holds plain files only.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), StagingError> {
    for entry in WalkDir::new(src)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_error(&target))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), StagingError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(io_error(path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), StagingError> {
    Ok(())
}
