//! Build script environment.
//!
//! The external `build`/`run`/`check` scripts locate the source tree and
//! every toolchain binary through a fixed set of environment variables. This
//! module computes those variables once per run and specialises them per job.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::{Config, ConfigError, EnvPolicy};
use crate::mode::BuildMode;

/// Variable names read by the build scripts.
pub mod vars {
    pub const ANDROID_BUILD_TOP: &str = "ANDROID_BUILD_TOP";
    pub const SBOX_PATH: &str = "SBOX_PATH";
    pub const BOOTCLASSPATH: &str = "ART_TEST_RUN_TEST_BOOTCLASSPATH";
    pub const TEST_NAME: &str = "TEST_NAME";
    pub const SOONG_ZIP: &str = "SOONG_ZIP";
    pub const ZIPALIGN: &str = "ZIPALIGN";
    pub const JAVA_HOME: &str = "JAVA_HOME";
    pub const JAVA: &str = "JAVA";
    pub const JAVAC: &str = "JAVAC";
    pub const JAVAC_ARGS: &str = "JAVAC_ARGS";
    pub const D8: &str = "D8";
    pub const HIDDENAPI: &str = "HIDDENAPI";
    pub const JASMIN: &str = "JASMIN";
    pub const SMALI: &str = "SMALI";
    pub const NEED_DEX: &str = "NEED_DEX";
    pub const USE_DESUGAR: &str = "USE_DESUGAR";
}

/// The complete environment for one build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
    policy: EnvPolicy,
}

impl BuildEnvironment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// The build variables, sorted by name.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn policy(&self) -> EnvPolicy {
        self.policy
    }

    /// Installs this environment on a command according to the run's policy.
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        if self.policy == EnvPolicy::Explicit {
            cmd.env_clear();
        }
        cmd.envs(&self.vars);
    }
}

/// Produces per-job environments from run-wide settings.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    common: BTreeMap<String, String>,
    policy: EnvPolicy,
}

impl EnvironmentBuilder {
    /// Resolves every run-wide variable from `config`.
    ///
    /// Fails only if the boot classpath cannot be joined into a path list.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let java_home = config.java_home();
        let mut common = BTreeMap::new();
        let mut set = |key: &str, value: &Path| {
            common.insert(key.to_string(), value.display().to_string());
        };

        set(vars::ANDROID_BUILD_TOP, &config.build_top());
        set(vars::SBOX_PATH, &config.sandbox_dir());
        set(vars::SOONG_ZIP, &config.soong_zip());
        set(vars::ZIPALIGN, &config.zipalign());
        set(vars::JAVA_HOME, &java_home);
        set(vars::JAVA, &java_home.join("bin/java"));
        set(vars::JAVAC, &java_home.join("bin/javac"));
        set(vars::D8, &config.d8());
        set(vars::HIDDENAPI, &config.hiddenapi());
        set(vars::JASMIN, &config.jasmin());
        set(vars::SMALI, &config.smali());

        common.insert(
            vars::BOOTCLASSPATH.to_string(),
            join_classpath(&config.bootclasspath())?,
        );
        common.insert(
            vars::JAVAC_ARGS.to_string(),
            config.toolchain.javac_args.clone(),
        );
        common.insert(vars::USE_DESUGAR.to_string(), "true".to_string());

        Ok(Self {
            common,
            policy: config.build.env_policy,
        })
    }

    /// Environment for building `test_id` in `mode`.
    pub fn build(&self, test_id: &str, mode: BuildMode) -> BuildEnvironment {
        let mut env = self.common.clone();
        env.insert(vars::TEST_NAME.to_string(), test_id.to_string());
        env.insert(vars::NEED_DEX.to_string(), mode.needs_dex().to_string());
        BuildEnvironment {
            vars: env,
            policy: self.policy,
        }
    }
}

fn join_classpath(jars: &[PathBuf]) -> Result<String, ConfigError> {
    let joined: OsString = std::env::join_paths(jars).map_err(|e| {
        ConfigError::InvalidBootclasspath {
            path: jars
                .iter()
                .find(|j| std::env::join_paths([j]).is_err())
                .cloned()
                .unwrap_or_default(),
            reason: e.to_string(),
        }
    })?;
    Ok(joined.to_string_lossy().into_owned())
}
