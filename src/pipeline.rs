//! Plan, build and package in one call.
//!
//! [`Pipeline`] owns the run-wide read-only state (configuration and the
//! known-failures table) and wires the components together:
//!
//! 1. discover tests and apply the shard/id selection
//! 2. plan jobs for the requested modes, dropping known failures
//! 3. create a fresh sandbox and run the jobs on the worker pool
//! 4. package the sandbox root, only if every job succeeded

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::environment::EnvironmentBuilder;
use crate::exclusion::{ExclusionError, KnownFailures};
use crate::job::JobId;
use crate::executor::{JobRunner, OutputCallback, ScriptRunner};
use crate::mode::BuildMode;
use crate::orchestrator::{self, Orchestrator, Plan, RunReport, WorkerPool};
use crate::packager::{Artifact, Packager, PackagingError};
use crate::report::Reporter;
use crate::sandbox::{SandboxError, SandboxLayout};
use crate::stager::SourceStager;
use crate::testcase::{self, SelectionError, TestSelection};

/// Errors that stop the pipeline before or after the builds.
///
/// Build failures are not errors: they are part of the returned
/// [`BuildOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    KnownFailures(#[from] ExclusionError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Packaging(#[from] PackagingError),
}

/// What to build and where to put the artifact.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Modes to build. Empty means every mode.
    pub modes: Vec<BuildMode>,
    pub selection: TestSelection,
    pub out: PathBuf,
}

impl BuildRequest {
    pub fn modes(&self) -> &[BuildMode] {
        if self.modes.is_empty() {
            &BuildMode::ALL
        } else {
            &self.modes
        }
    }
}

/// Result of a full pipeline run.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub report: RunReport,
    /// Present only if every job succeeded.
    pub artifact: Option<Artifact>,
}

impl BuildOutcome {
    pub fn success(&self) -> bool {
        self.report.success() && self.artifact.is_some()
    }

    pub fn exit_code(&self) -> i32 {
        match self.report.exit_code() {
            0 if self.artifact.is_none() => 1,
            code => code,
        }
    }
}

/// The configured build pipeline.
pub struct Pipeline {
    config: Arc<Config>,
    known_failures: Arc<KnownFailures>,
}

impl Pipeline {
    /// Loads the known-failures table named by `config`.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        let known_failures = match config.known_failures_path() {
            Some(path) => {
                let table = KnownFailures::load(&path)?;
                info!("Loaded {} known build failures from {}", table.len(), path.display());
                table
            }
            None => KnownFailures::empty(),
        };
        Ok(Self::with_known_failures(config, known_failures))
    }

    pub fn with_known_failures(config: Config, known_failures: KnownFailures) -> Self {
        Self {
            config: Arc::new(config),
            known_failures: Arc::new(known_failures),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn known_failures(&self) -> &KnownFailures {
        &self.known_failures
    }

    /// Discovers the selected tests and plans their jobs.
    pub fn plan(&self, modes: &[BuildMode], selection: &TestSelection) -> Result<Plan, PipelineError> {
        let tests = testcase::discover(&self.config.tests_dir())?;
        let selected = selection.apply(tests)?;
        if selected.is_empty() {
            warn!("No tests selected in {}", self.config.tests_dir().display());
        }
        Ok(orchestrator::plan(selected, modes, &self.known_failures))
    }

    /// Builds the request with the staged `build` scripts and the configured
    /// archiver.
    pub async fn build<R: Reporter>(
        &self,
        request: &BuildRequest,
        reporter: R,
    ) -> Result<BuildOutcome, PipelineError> {
        let mut runner = ScriptRunner::new();
        if self.config.build.stream_output {
            let callback: OutputCallback =
                Arc::new(|job: &JobId, line: &str| info!("[{}] {}", job, line));
            runner = runner.with_streaming(callback);
        }
        let packager = Packager::from_config(&self.config)?;
        self.build_with(request, reporter, Arc::new(runner), &packager)
            .await
    }

    /// Like [`build`](Self::build) with an explicit runner and packager.
    pub async fn build_with<R: Reporter>(
        &self,
        request: &BuildRequest,
        reporter: R,
        runner: Arc<dyn JobRunner>,
        packager: &Packager,
    ) -> Result<BuildOutcome, PipelineError> {
        let plan = self.plan(request.modes(), &request.selection)?;

        let root = self.config.sandbox_root();
        let layout = SandboxLayout::create(&root)?;
        let stager = SourceStager::new(
            layout,
            self.config.default_scripts_dir(),
            self.known_failures.clone(),
        );
        let environment = EnvironmentBuilder::new(&self.config)?;

        let pool = WorkerPool::new(
            self.config.max_parallel(),
            Arc::new(stager),
            Arc::new(environment),
            runner,
        )
        .with_suppression(self.config.build.suppress_later_modes);
        let orchestrator = Orchestrator::new(pool, reporter, self.config.build.keep_going);

        let report = orchestrator.run(&plan).await;
        if !report.success() {
            warn!("Not packaging {}: the build failed", root.display());
            return Ok(BuildOutcome {
                report,
                artifact: None,
            });
        }

        let artifact = packager.package(&root, &request.out).await?;
        Ok(BuildOutcome {
            report,
            artifact: Some(artifact),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::job::JobId;
    use crate::orchestrator::tests::{FakeRunner, Tree};
    use crate::packager::Archiver;
    use crate::report::NullReporter;

    struct CountingArchiver(Arc<AtomicUsize>);

    #[async_trait]
    impl Archiver for CountingArchiver {
        fn name(&self) -> &str {
            "counting"
        }

        async fn archive(&self, _root: &Path, out: &Path) -> Result<(), PackagingError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::fs::write(out, b"archive").map_err(PackagingError::Archive)
        }
    }

    fn config(tree: &Tree, workers: usize) -> Config {
        let mut config = Config::default();
        config.build.build_top = tree.dir.path().to_path_buf();
        config.build.tests_dir = "tests".into();
        config.build.default_scripts_dir = "etc".into();
        config.build.sandbox_dir = "sbox".into();
        config.build.known_failures = None;
        config.build.max_parallel = Some(workers);
        config
    }

    fn request(tree: &Tree) -> BuildRequest {
        BuildRequest {
            modes: vec![BuildMode::Host],
            selection: TestSelection::default(),
            out: tree.dir.path().join("out/run-tests.zip"),
        }
    }

    #[tokio::test]
    async fn test_failed_job_never_packages() {
        let tree = Tree::new(10);
        let pipeline = Pipeline::with_known_failures(config(&tree, 4), KnownFailures::empty());
        let runner = Arc::new(FakeRunner {
            exit_codes: HashMap::from([(JobId::new(BuildMode::Host, "007-test"), 1)]),
            ..FakeRunner::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let packager = Packager::new(Box::new(CountingArchiver(calls.clone())));

        let req = request(&tree);
        let outcome = pipeline
            .build_with(&req, NullReporter, runner, &packager)
            .await
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.artifact.is_none());
        assert_eq!(outcome.report.failures[0].job().test, "007-test");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!req.out.exists());
    }

    #[tokio::test]
    async fn test_success_packages_once() {
        let tree = Tree::new(3);
        let pipeline = Pipeline::with_known_failures(config(&tree, 2), KnownFailures::empty());
        let calls = Arc::new(AtomicUsize::new(0));
        let packager = Packager::new(Box::new(CountingArchiver(calls.clone())));

        let req = request(&tree);
        let outcome = pipeline
            .build_with(&req, NullReporter, Arc::new(FakeRunner::default()), &packager)
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&req.out).unwrap(), b"archive");
        assert!(tree.dir.path().join("sbox/zip/host/002-test/build").is_file());
    }

    #[tokio::test]
    async fn test_reused_sandbox_is_rejected() {
        let tree = Tree::new(1);
        std::fs::create_dir_all(tree.dir.path().join("sbox/zip/host/001-test")).unwrap();
        let pipeline = Pipeline::with_known_failures(config(&tree, 1), KnownFailures::empty());
        let packager = Packager::new(Box::new(CountingArchiver(Arc::new(AtomicUsize::new(0)))));

        let err = pipeline
            .build_with(&request(&tree), NullReporter, Arc::new(FakeRunner::default()), &packager)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Sandbox(SandboxError::NotEmpty(_))));
    }

    #[test]
    fn test_plan_applies_selection_and_known_failures() {
        let tree = Tree::new(12);
        let known = KnownFailures::from_json_str(r#"[{"test": "011-test", "variant": "host"}]"#)
            .unwrap();
        let pipeline = Pipeline::with_known_failures(config(&tree, 1), known);

        let selection = TestSelection {
            shards: vec!["11".to_string()],
            ids: vec!["003-test".to_string()],
        };
        let plan = pipeline
            .plan(&[BuildMode::Host, BuildMode::Jvm], &selection)
            .unwrap();

        let ids: Vec<String> = plan.jobs.iter().map(|j| j.id().to_string()).collect();
        assert_eq!(ids, ["host/003-test", "jvm/003-test", "jvm/011-test"]);
        assert_eq!(plan.skipped, vec![JobId::new(BuildMode::Host, "011-test")]);
    }

    #[test]
    fn test_empty_modes_means_all() {
        let req = BuildRequest {
            modes: vec![],
            selection: TestSelection::default(),
            out: "a.zip".into(),
        };
        assert_eq!(req.modes(), &BuildMode::ALL);
    }
}
