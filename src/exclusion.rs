//! Known build failures.
//!
//! Some tests cannot be built in some modes (a test using ART-only APIs does
//! not compile for the reference JVM, for example). Those pairs are listed in
//! a JSON table and never scheduled.
//!
//! # File Format
//!
//! ```json
//! [
//!   {
//!     "tests": ["001-HelloWorld", "002-sleep"],
//!     "variant": "jvm",
//!     "description": "Uses dalvik.system APIs",
//!     "bug": "b/12345"
//!   },
//!   {
//!     "test": "004-JniTest",
//!     "variant": "host",
//!     "env_vars": {"SANITIZE_HOST": "address"}
//!   }
//! ]
//! ```
//!
//! A record skips a (test, mode) pair only when the test is listed, the
//! `variant` is exactly the mode name, and `env_vars` is absent or falsy
//! (`null`, `false`, `0`, `""`, `[]`, `{}`).
//! Conditional records are left to the test runner, which knows the
//! environment the tests will eventually run under.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::mode::BuildMode;

/// Errors raised while loading a known-failures table.
#[derive(Debug, thiserror::Error)]
pub enum ExclusionError {
    /// The file could not be read.
    #[error("Failed to read known failures from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not a JSON array.
    #[error("Known failures must be a JSON array of records: {0}")]
    Parse(#[source] serde_json::Error),

    /// A record has the wrong shape.
    #[error("Invalid known-failure record #{index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

/// Record as it appears on disk, before validation.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    tests: Option<Vec<String>>,
    #[serde(default)]
    test: Option<String>,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    env_vars: Option<serde_json::Value>,
    #[serde(default)]
    bug: Option<String>,
    #[serde(default)]
    description: Option<Description>,
}

/// Descriptions are either a string or a list of lines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Description {
    Text(String),
    Lines(Vec<String>),
}

/// One validated entry of the known-failures table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRule {
    /// Tests the rule applies to.
    pub tests: BTreeSet<String>,

    /// Variant expression; only a plain mode name can match a build.
    pub variant: Option<String>,

    /// Environment condition. Empty means unconditional.
    pub env_vars: BTreeMap<String, String>,

    /// Bug reference, informational.
    pub bug: Option<String>,

    /// Free-form description, informational.
    pub description: Option<String>,
}

impl ExclusionRule {
    /// Returns `true` if the rule only applies under some environment.
    pub fn is_conditional(&self) -> bool {
        !self.env_vars.is_empty()
    }

    /// Returns `true` if this rule skips building `test_id` in `mode`.
    pub fn matches(&self, test_id: &str, mode: BuildMode) -> bool {
        !self.is_conditional()
            && self.variant.as_deref() == Some(mode.as_str())
            && self.tests.contains(test_id)
    }

    fn from_raw(index: usize, raw: RawRecord) -> Result<Self, ExclusionError> {
        let invalid = |reason: &str| ExclusionError::InvalidRecord {
            index,
            reason: reason.to_string(),
        };

        let tests: BTreeSet<String> = match (raw.tests, raw.test) {
            (Some(_), Some(_)) => return Err(invalid("both 'test' and 'tests' are set")),
            (Some(tests), None) => tests.into_iter().collect(),
            (None, Some(test)) => BTreeSet::from([test]),
            (None, None) => return Err(invalid("missing 'test' or 'tests'")),
        };
        if tests.is_empty() {
            return Err(invalid("empty test list"));
        }
        if tests.iter().any(|t| t.trim().is_empty()) {
            return Err(invalid("blank test id"));
        }

        let description = raw.description.map(|d| match d {
            Description::Text(text) => text,
            Description::Lines(lines) => lines.join(" "),
        });

        Ok(Self {
            tests,
            variant: raw.variant.map(|v| v.trim().to_string()),
            env_vars: env_condition(raw.env_vars).map_err(|reason| invalid(&reason))?,
            bug: raw.bug,
            description,
        })
    }
}

/// Reads an `env_vars` condition. Any falsy JSON value (`null`, `false`,
/// `0`, `""`, `[]`, `{}`) means the record is unconditional.
fn env_condition(value: Option<serde_json::Value>) -> Result<BTreeMap<String, String>, String> {
    use serde_json::Value;

    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(BTreeMap::new()),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Ok(BTreeMap::new()),
        Some(Value::String(s)) if s.is_empty() => Ok(BTreeMap::new()),
        Some(Value::Array(items)) if items.is_empty() => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(text) => Ok((key, text)),
                other => Err(format!("env_vars.{} must be a string, got {}", key, other)),
            })
            .collect(),
        Some(other) => Err(format!("env_vars must be an object, got {}", other)),
    }
}

/// The immutable known-failures table for a run.
#[derive(Debug, Clone, Default)]
pub struct KnownFailures {
    rules: Vec<ExclusionRule>,
}

impl KnownFailures {
    /// An empty table that never skips anything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a table from already validated rules.
    pub fn from_rules(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    /// Loads and validates the table at `path`.
    pub fn load(path: &Path) -> Result<Self, ExclusionError> {
        let content = std::fs::read_to_string(path).map_err(|source| ExclusionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_json_str(&content)?;
        debug!(
            "Loaded {} known-failure records from {}",
            table.rules.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parses and validates a table from JSON text.
    ///
    /// Every record is validated up front; the first malformed record fails
    /// the whole load.
    ///
    /// # Example
    ///
    /// ```
    /// use rtbuild::exclusion::KnownFailures;
    /// use rtbuild::mode::BuildMode;
    ///
    /// let table = KnownFailures::from_json_str(
    ///     r#"[{"tests": ["001-HelloWorld"], "variant": "jvm"}]"#,
    /// )?;
    /// assert!(table.should_skip("001-HelloWorld", BuildMode::Jvm));
    /// assert!(!table.should_skip("001-HelloWorld", BuildMode::Host));
    /// # Ok::<(), rtbuild::exclusion::ExclusionError>(())
    /// ```
    pub fn from_json_str(content: &str) -> Result<Self, ExclusionError> {
        let records: Vec<serde_json::Value> =
            serde_json::from_str(content).map_err(ExclusionError::Parse)?;

        let rules = records
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                if !value.is_object() {
                    return Err(ExclusionError::InvalidRecord {
                        index,
                        reason: "record is not an object".to_string(),
                    });
                }
                let raw: RawRecord =
                    serde_json::from_value(value).map_err(|e| ExclusionError::InvalidRecord {
                        index,
                        reason: e.to_string(),
                    })?;
                ExclusionRule::from_raw(index, raw)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// Returns `true` if building `test_id` in `mode` is a known failure.
    pub fn should_skip(&self, test_id: &str, mode: BuildMode) -> bool {
        self.rules.iter().any(|rule| rule.matches(test_id, mode))
    }

    /// All rules, in file order.
    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
