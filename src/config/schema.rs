//! Configuration schema definitions for rtbuild.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every section is optional; an empty file (or no
//! file at all) describes a run from the root of an Android source tree with
//! the stock prebuilt locations.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── BuildConfig        - Tree layout, parallelism, failure policy
//! ├── ToolchainConfig    - Tool locations exported to build scripts
//! ├── PackageConfig      - How the sandbox root is archived
//! │   └── ArchiverConfig - Tagged enum: external command or built-in tar
//! └── ReportConfig       - Optional JUnit output
//! ```
//!
//! Relative paths are resolved against `build.build_top` and `~` is expanded;
//! see [`Config`](super::Config)'s path accessors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for rtbuild.
///
/// # TOML Structure
///
/// ```toml
/// [build]
/// build_top = "/src/aosp"
/// max_parallel = 16
///
/// [toolchain]
/// bootclasspath = ["out/soong/.intermediates/core-all.jar"]
///
/// [package.archiver]
/// type = "tar"
///
/// [report]
/// junit = "out/rtbuild/junit.xml"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Tree layout and scheduling settings.
    #[serde(default)]
    pub build: BuildConfig,

    /// Toolchain binaries handed to build scripts.
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Packaging of the sandbox root.
    #[serde(default)]
    pub package: PackageConfig,

    /// Report output.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core build settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `build_top` | `.` |
/// | `tests_dir` | `art/test` |
/// | `default_scripts_dir` | `art/test/etc` |
/// | `known_failures` | `art/test/buildfailures.json` |
/// | `sandbox_dir` | `out/rtbuild/sbox` |
/// | `max_parallel` | available host parallelism |
/// | `keep_going` | false |
/// | `suppress_later_modes` | false |
/// | `env_policy` | `inherit` |
/// | `stream_output` | false |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildConfig {
    /// Root of the source tree, exported as `ANDROID_BUILD_TOP`.
    #[serde(default = "default_build_top")]
    pub build_top: PathBuf,

    /// Directory holding one subdirectory per run-test.
    #[serde(default = "default_tests_dir")]
    pub tests_dir: PathBuf,

    /// Directory holding the shared `default-build`, `default-run` and
    /// `default-check` scripts.
    #[serde(default = "default_scripts_dir")]
    pub default_scripts_dir: PathBuf,

    /// Known build failures table. An empty string disables it, so nothing
    /// is excluded.
    #[serde(default = "default_known_failures")]
    pub known_failures: Option<PathBuf>,

    /// Scratch directory for the run, exported as `SBOX_PATH`.
    ///
    /// Tests are staged under `<sandbox_dir>/zip/<mode>/<test>` and the
    /// `zip` directory is what gets packaged.
    #[serde(default = "default_sandbox_dir")]
    pub sandbox_dir: PathBuf,

    /// Maximum number of builds running at once.
    ///
    /// Set to 1 for a sequential, deterministic run.
    ///
    /// Default: available host parallelism
    pub max_parallel: Option<usize>,

    /// Keep building after a build failure to report every failing job.
    ///
    /// The run still fails and nothing is packaged.
    #[serde(default)]
    pub keep_going: bool,

    /// When a test fails in one mode, do not start its later modes.
    ///
    /// Only has an effect together with `keep_going`.
    #[serde(default)]
    pub suppress_later_modes: bool,

    /// How the build scripts' environment is constructed.
    #[serde(default)]
    pub env_policy: EnvPolicy,

    /// Print build output as it is produced, prefixed with the job id.
    #[serde(default)]
    pub stream_output: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            build_top: default_build_top(),
            tests_dir: default_tests_dir(),
            default_scripts_dir: default_scripts_dir(),
            known_failures: default_known_failures(),
            sandbox_dir: default_sandbox_dir(),
            max_parallel: None,
            keep_going: false,
            suppress_later_modes: false,
            env_policy: EnvPolicy::default(),
            stream_output: false,
        }
    }
}

fn default_build_top() -> PathBuf {
    PathBuf::from(".")
}

fn default_tests_dir() -> PathBuf {
    PathBuf::from("art/test")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("art/test/etc")
}

fn default_known_failures() -> Option<PathBuf> {
    Some(PathBuf::from("art/test/buildfailures.json"))
}

fn default_sandbox_dir() -> PathBuf {
    PathBuf::from("out/rtbuild/sbox")
}

/// Environment construction policy, applied to every job of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvPolicy {
    /// Start from the orchestrator's own environment and override the
    /// build variables.
    #[default]
    Inherit,

    /// Start from an empty environment containing only the build variables.
    Explicit,
}

/// Locations of the tools build scripts invoke.
///
/// Tools not listed individually default to `<tools_dir>/<name>`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolchainConfig {
    /// JDK root. `JAVA` and `JAVAC` point into its `bin/`.
    #[serde(default = "default_java_home")]
    pub java_home: PathBuf,

    /// Directory containing host tools built from the tree.
    #[serde(default = "default_tools_dir")]
    pub tools_dir: PathBuf,

    /// Zip archiver, also the default packaging tool.
    #[serde(default = "default_soong_zip")]
    pub soong_zip: PathBuf,

    /// Zip alignment tool.
    #[serde(default = "default_zipalign")]
    pub zipalign: PathBuf,

    /// Dex compiler. Default: `<tools_dir>/d8`
    pub d8: Option<PathBuf>,

    /// Hidden API encoder. Default: `<tools_dir>/hiddenapi`
    pub hiddenapi: Option<PathBuf>,

    /// Jasmin assembler. Default: `<tools_dir>/jasmin`
    pub jasmin: Option<PathBuf>,

    /// Smali assembler. Default: `<tools_dir>/smali`
    pub smali: Option<PathBuf>,

    /// Flags every javac invocation starts with, exported as `JAVAC_ARGS`.
    #[serde(default = "default_javac_args")]
    pub javac_args: String,

    /// Jar files forming the boot classpath for compilation.
    #[serde(default)]
    pub bootclasspath: Vec<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            java_home: default_java_home(),
            tools_dir: default_tools_dir(),
            soong_zip: default_soong_zip(),
            zipalign: default_zipalign(),
            d8: None,
            hiddenapi: None,
            jasmin: None,
            smali: None,
            javac_args: default_javac_args(),
            bootclasspath: Vec::new(),
        }
    }
}

fn default_java_home() -> PathBuf {
    PathBuf::from("prebuilts/jdk/jdk11/linux-x86")
}

fn default_tools_dir() -> PathBuf {
    PathBuf::from("out/host/linux-x86/bin")
}

fn default_soong_zip() -> PathBuf {
    PathBuf::from("prebuilts/build-tools/linux-x86/bin/soong_zip")
}

fn default_zipalign() -> PathBuf {
    PathBuf::from("prebuilts/build-tools/linux-x86/bin/zipalign")
}

fn default_javac_args() -> String {
    "-g -Xlint:-options -source 1.8 -target 1.8".to_string()
}

/// Packaging settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PackageConfig {
    /// Tool producing the artifact.
    #[serde(default)]
    pub archiver: ArchiverConfig,
}

/// Archiver selection.
///
/// # Example
///
/// ```toml
/// # External tool (default). {out}, {root} and {soong_zip} are substituted.
/// [package.archiver]
/// type = "external"
/// command = "{soong_zip} -o {out} -C {root} -D {root}"
///
/// # Built-in deterministic tar
/// [package.archiver]
/// type = "tar"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArchiverConfig {
    /// Run an external archiving command.
    External {
        /// Command template, split with shell quoting rules.
        #[serde(default = "default_archiver_command")]
        command: String,
    },

    /// Write a tar archive in-process.
    Tar,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        ArchiverConfig::External {
            command: default_archiver_command(),
        }
    }
}

fn default_archiver_command() -> String {
    "{soong_zip} -o {out} -C {root} -D {root}".to_string()
}

/// Report settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Write a JUnit XML report of the builds to this path.
    pub junit: Option<PathBuf>,
}
