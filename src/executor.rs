//! Build execution.
//!
//! A [`JobRunner`] turns a staged [`BuildJob`] into a [`BuildResult`]. The
//! production runner, [`ScriptRunner`], spawns the staged directory's
//! `build` script with the job's mode flag:
//!
//! ```text
//! cd <sandbox>/<mode>/<test> && ./build --<mode>
//! ```
//!
//! Standard output and standard error are captured as one text, interleaved
//! line by line in the order the lines arrive.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tracing::debug;

use crate::job::{BuildJob, BuildResult, JobId};

/// Name of the entry point every staged test provides.
pub const BUILD_SCRIPT: &str = "build";

/// Errors that prevent a build from producing a result.
///
/// A build script that runs and exits nonzero is not an error here; it is a
/// [`BuildResult`] with a nonzero exit code.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to start {script}: {source}")]
    Spawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read output of {job}: {source}")]
    Output {
        job: JobId,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for build of {job}: {source}")]
    Wait {
        job: JobId,
        #[source]
        source: std::io::Error,
    },
}

/// Callback receiving each output line as it is produced.
pub type OutputCallback = Arc<dyn Fn(&JobId, &str) + Send + Sync>;

/// Runs one staged build job.
///
/// Implementations must be shareable between workers: a single runner is
/// used for every job of a run.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &BuildJob) -> Result<BuildResult, ExecError>;
}

/// Runs the staged `build` script as a child process.
#[derive(Default, Clone)]
pub struct ScriptRunner {
    output_callback: Option<OutputCallback>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards every output line to `callback` while the build runs.
    ///
    /// The full output is still collected into the [`BuildResult`].
    pub fn with_streaming(mut self, callback: OutputCallback) -> Self {
        self.output_callback = Some(callback);
        self
    }
}

#[async_trait]
impl JobRunner for ScriptRunner {
    async fn run(&self, job: &BuildJob) -> Result<BuildResult, ExecError> {
        let start = Instant::now();
        let script = job.staged_dir.join(BUILD_SCRIPT);

        let mut process = tokio::process::Command::new(&script);
        process
            .arg(job.id.mode.flag())
            .current_dir(&job.staged_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        job.env.apply(&mut process);

        debug!("Running {} {}", script.display(), job.id.mode.flag());
        let mut child = process.spawn().map_err(|source| ExecError::Spawn {
            script: script.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| missing_pipe(&job.id, "stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| missing_pipe(&job.id, "stderr"))?;
        let mut merged = Box::pin(stream::select(
            lines(BufReader::new(stdout)),
            lines(BufReader::new(stderr)),
        ));

        let mut output = String::new();
        while let Some(line) = merged.next().await {
            let line = line.map_err(|source| ExecError::Output {
                job: job.id.clone(),
                source,
            })?;
            if let Some(callback) = &self.output_callback {
                callback(&job.id, &line);
            }
            output.push_str(&line);
            output.push('\n');
        }

        let status = child.wait().await.map_err(|source| ExecError::Wait {
            job: job.id.clone(),
            source,
        })?;
        // No exit code means the script was killed by a signal.
        let exit_code = status.code().unwrap_or(-1);
        let duration = start.elapsed();

        debug!(
            "Build of {} exited with code {} in {:?}",
            job.id, exit_code, duration
        );

        Ok(BuildResult {
            job: job.id.clone(),
            exit_code,
            output,
            duration,
        })
    }
}

fn missing_pipe(job: &JobId, name: &str) -> ExecError {
    ExecError::Output {
        job: job.clone(),
        source: std::io::Error::other(format!("{} not captured", name)),
    }
}

/// Splits a pipe into lines, decoding each lossily so that stray non-UTF-8
/// bytes from compilers do not abort the capture.
fn lines<R>(reader: BufReader<R>) -> impl futures::Stream<Item = std::io::Result<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    SplitStream::new(reader.split(b'\n')).map(|chunk| {
        chunk.map(|mut bytes| {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            String::from_utf8_lossy(&bytes).into_owned()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::environment::EnvironmentBuilder;
    use crate::mode::BuildMode;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn staged(script: &str) -> (TempDir, BuildJob) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(BUILD_SCRIPT);
        std::fs::write(&path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let env = EnvironmentBuilder::new(&Config::default())
            .unwrap()
            .build("001-HelloWorld", BuildMode::Host);
        let job = BuildJob {
            id: JobId::new(BuildMode::Host, "001-HelloWorld"),
            staged_dir: dir.path().to_path_buf(),
            env,
        };
        (dir, job)
    }

    #[tokio::test]
    async fn test_success_captures_output() {
        let (_dir, job) = staged("#!/bin/sh\necho \"building $TEST_NAME with $1\"\n");

        let result = ScriptRunner::new().run(&job).await.unwrap();
        assert!(result.success());
        assert_eq!(result.output, "building 001-HelloWorld with --host\n");
        assert_eq!(result.job, job.id);
    }

    #[tokio::test]
    async fn test_stderr_merged_and_exit_code_kept() {
        let (_dir, job) = staged("#!/bin/sh\necho to-stdout\necho to-stderr >&2\nexit 3\n");

        let result = ScriptRunner::new().run(&job).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("to-stdout\n"));
        assert!(result.output.contains("to-stderr\n"));
    }

    #[tokio::test]
    async fn test_runs_in_staged_dir() {
        let (dir, job) = staged("#!/bin/sh\npwd\n");

        let result = ScriptRunner::new().run(&job).await.unwrap();
        let reported = std::fs::canonicalize(result.output.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_signal_reports_minus_one() {
        let (_dir, job) = staged("#!/bin/sh\nkill -9 $$\n");

        let result = ScriptRunner::new().run(&job).await.unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_missing_script_is_spawn_error() {
        let (dir, job) = staged("");
        std::fs::remove_file(dir.path().join(BUILD_SCRIPT)).unwrap();

        let err = ScriptRunner::new().run(&job).await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_streaming_callback_sees_every_line() {
        let (_dir, job) = staged("#!/bin/sh\necho one\necho two\n");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let runner = ScriptRunner::new().with_streaming(Arc::new(move |id: &JobId, line: &str| {
            sink.lock().unwrap().push(format!("[{}] {}", id, line));
        }));
        let result = runner.run(&job).await.unwrap();

        assert_eq!(result.output, "one\ntwo\n");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["[host/001-HelloWorld] one", "[host/001-HelloWorld] two"]
        );
    }
}
