//! Configuration loading and schema definitions for rtbuild.
//!
//! This module provides types and functions for loading rtbuild configuration
//! from TOML files or strings, resolving the paths it contains, and checking
//! it before a run starts. After loading (and after CLI overrides are
//! applied) a [`Config`] is never mutated again; it is shared read-only by
//! every component of the run.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Errors found by [`Config::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `max_parallel` must allow at least one build.
    #[error("build.max_parallel must be at least 1")]
    ZeroParallelism,

    /// A boot classpath entry cannot be joined into a path list.
    #[error("Invalid boot classpath entry {path}: {reason}")]
    InvalidBootclasspath { path: PathBuf, reason: String },

    /// The external archiver command is unusable.
    #[error("Invalid archiver command '{command}': {reason}")]
    InvalidArchiverCommand { command: String, reason: String },
}

/// Loads rtbuild configuration from a TOML file and validates it.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
/// - [`Config::validate`] rejects it
///
/// # Example
///
/// ```no_run
/// use rtbuild::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("rtbuild.toml"))?;
/// println!("Tests directory: {}", config.tests_dir().display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    Ok(config)
}

/// Loads rtbuild configuration from a TOML string.
///
/// # Example
///
/// ```
/// use rtbuild::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [build]
///     build_top = "/src/aosp"
///     max_parallel = 4
/// "#)?;
///
/// assert_eq!(config.max_parallel(), 4);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    config.validate().context("Invalid config")?;
    Ok(config)
}

impl Config {
    /// Checks settings that the schema alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.max_parallel == Some(0) {
            return Err(ConfigError::ZeroParallelism);
        }

        for jar in &self.toolchain.bootclasspath {
            std::env::join_paths([jar]).map_err(|e| ConfigError::InvalidBootclasspath {
                path: jar.clone(),
                reason: e.to_string(),
            })?;
        }

        if let ArchiverConfig::External { command } = &self.package.archiver {
            let invalid = |reason: &str| ConfigError::InvalidArchiverCommand {
                command: command.clone(),
                reason: reason.to_string(),
            };
            let parts = shell_words::split(command).map_err(|e| invalid(&e.to_string()))?;
            if parts.is_empty() {
                return Err(invalid("command is empty"));
            }
            if !parts.iter().any(|p| p.contains("{out}")) {
                return Err(invalid("command must reference {out}"));
            }
        }

        Ok(())
    }

    /// Absolute root of the source tree.
    pub fn build_top(&self) -> PathBuf {
        let expanded = expand(&self.build.build_top);
        std::path::absolute(&expanded).unwrap_or(expanded)
    }

    /// Resolves a configured path: `~` is expanded and relative paths are
    /// taken relative to [`build_top`](Self::build_top).
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let expanded = expand(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.build_top().join(expanded)
        }
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.resolve(&self.build.tests_dir)
    }

    pub fn default_scripts_dir(&self) -> PathBuf {
        self.resolve(&self.build.default_scripts_dir)
    }

    /// The known-failures table, or `None` if it is disabled with
    /// `known_failures = ""`.
    pub fn known_failures_path(&self) -> Option<PathBuf> {
        self.build
            .known_failures
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| self.resolve(p))
    }

    /// The run's scratch directory (`SBOX_PATH`).
    pub fn sandbox_dir(&self) -> PathBuf {
        self.resolve(&self.build.sandbox_dir)
    }

    /// Directory tests are staged into and which gets packaged.
    pub fn sandbox_root(&self) -> PathBuf {
        self.sandbox_dir().join("zip")
    }

    /// Effective worker count.
    pub fn max_parallel(&self) -> usize {
        self.build.max_parallel.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn java_home(&self) -> PathBuf {
        self.resolve(&self.toolchain.java_home)
    }

    pub fn soong_zip(&self) -> PathBuf {
        self.resolve(&self.toolchain.soong_zip)
    }

    pub fn zipalign(&self) -> PathBuf {
        self.resolve(&self.toolchain.zipalign)
    }

    pub fn d8(&self) -> PathBuf {
        self.tool(self.toolchain.d8.as_deref(), "d8")
    }

    pub fn hiddenapi(&self) -> PathBuf {
        self.tool(self.toolchain.hiddenapi.as_deref(), "hiddenapi")
    }

    pub fn jasmin(&self) -> PathBuf {
        self.tool(self.toolchain.jasmin.as_deref(), "jasmin")
    }

    pub fn smali(&self) -> PathBuf {
        self.tool(self.toolchain.smali.as_deref(), "smali")
    }

    /// Boot classpath jars as absolute paths, in configured order.
    pub fn bootclasspath(&self) -> Vec<PathBuf> {
        self.toolchain
            .bootclasspath
            .iter()
            .map(|p| self.resolve(p))
            .collect()
    }

    fn tool(&self, configured: Option<&Path>, name: &str) -> PathBuf {
        match configured {
            Some(path) => self.resolve(path),
            None => self.resolve(&self.toolchain.tools_dir).join(name),
        }
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert!(!config.build.keep_going);
        assert_eq!(config.build.env_policy, EnvPolicy::Inherit);
        assert_eq!(config.package.archiver, ArchiverConfig::default());
        assert!(config.max_parallel() >= 1);
        assert!(config.report.junit.is_none());
    }

    #[test]
    fn test_paths_resolve_against_build_top() {
        let config = load_config_str(
            r#"
            [build]
            build_top = "/src/aosp"
            sandbox_dir = "/tmp/sbox"
            "#,
        )
        .unwrap();

        assert_eq!(config.build_top(), PathBuf::from("/src/aosp"));
        assert_eq!(config.tests_dir(), PathBuf::from("/src/aosp/art/test"));
        assert_eq!(config.default_scripts_dir(), PathBuf::from("/src/aosp/art/test/etc"));
        assert_eq!(
            config.known_failures_path(),
            Some(PathBuf::from("/src/aosp/art/test/buildfailures.json"))
        );
        assert_eq!(config.sandbox_root(), PathBuf::from("/tmp/sbox/zip"));
        assert_eq!(
            config.java_home(),
            PathBuf::from("/src/aosp/prebuilts/jdk/jdk11/linux-x86")
        );
    }

    #[test]
    fn test_tool_overrides() {
        let config = load_config_str(
            r#"
            [build]
            build_top = "/src"

            [toolchain]
            tools_dir = "/opt/tools"
            d8 = "/opt/r8/d8"
            "#,
        )
        .unwrap();

        assert_eq!(config.d8(), PathBuf::from("/opt/r8/d8"));
        assert_eq!(config.smali(), PathBuf::from("/opt/tools/smali"));
        assert_eq!(config.hiddenapi(), PathBuf::from("/opt/tools/hiddenapi"));
    }

    #[test]
    fn test_unset_known_failures() {
        let mut config = Config::default();
        config.build.known_failures = None;
        assert!(config.known_failures_path().is_none());
    }

    #[test]
    fn test_empty_known_failures_disables_table() {
        let config = load_config_str("[build]\nknown_failures = \"\"\n").unwrap();
        assert!(config.known_failures_path().is_none());
    }

    #[test]
    fn test_tar_archiver() {
        let config = load_config_str(
            r#"
            [package.archiver]
            type = "tar"
            "#,
        )
        .unwrap();
        assert_eq!(config.package.archiver, ArchiverConfig::Tar);
    }

    #[test]
    fn test_explicit_env_policy() {
        let config = load_config_str(
            r#"
            [build]
            env_policy = "explicit"
            "#,
        )
        .unwrap();
        assert_eq!(config.build.env_policy, EnvPolicy::Explicit);
    }

    #[test]
    fn test_rejects_zero_parallelism() {
        let err = load_config_str("[build]\nmax_parallel = 0\n").unwrap_err();
        assert!(format!("{:#}", err).contains("max_parallel"));
    }

    #[test]
    fn test_rejects_archiver_without_out() {
        let result = load_config_str(
            r#"
            [package.archiver]
            type = "external"
            command = "zip -r {root}"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_archiver_type() {
        assert!(load_config_str("[package.archiver]\ntype = \"rar\"\n").is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Path::new("/nonexistent/rtbuild.toml")).is_err());
    }
}
