//! rtbuild: a parallel run-test build orchestrator.
//!
//! Given a directory of independent run-tests, rtbuild stages every
//! selected test into an isolated sandbox directory once per build mode,
//! runs each test's `build` script in parallel with a toolchain-specific
//! environment, stops at the first failure, and packages the sandbox into a
//! single artifact when every build succeeded.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Selection** ([`testcase`], [`exclusion`]): find tests, apply shards,
//!   drop known build failures
//! - **Staging** ([`sandbox`], [`stager`]): copy sources into
//!   `<root>/<mode>/<test>` and install lifecycle scripts
//! - **Execution** ([`environment`], [`executor`]): run `build --<mode>`
//! - **Orchestration** ([`orchestrator`]): worker pool and fail-fast
//!   aggregation
//! - **Packaging** ([`packager`]): archive the sandbox root atomically
//! - **Report** ([`report`]): console output and JUnit XML
//!
//! # Example
//!
//! ```no_run
//! use rtbuild::config::load_config;
//! use rtbuild::pipeline::{BuildRequest, Pipeline};
//! use rtbuild::report::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("rtbuild.toml"))?;
//!     let pipeline = Pipeline::new(config)?;
//!
//!     let request = BuildRequest {
//!         modes: vec![],
//!         selection: Default::default(),
//!         out: "out/run-tests.zip".into(),
//!     };
//!     let outcome = pipeline.build(&request, ConsoleReporter::new(false)).await?;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

pub mod config;
pub mod environment;
pub mod exclusion;
pub mod executor;
pub mod job;
pub mod mode;
pub mod orchestrator;
pub mod packager;
pub mod pipeline;
pub mod report;
pub mod sandbox;
pub mod stager;
pub mod testcase;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use exclusion::KnownFailures;
pub use job::{BuildResult, JobFailure, JobId};
pub use mode::BuildMode;
pub use orchestrator::{Orchestrator, RunReport};
pub use pipeline::{BuildOutcome, BuildRequest, Pipeline};
pub use report::Reporter;
pub use testcase::{TestCase, TestSelection};
