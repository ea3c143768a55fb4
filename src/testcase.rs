//! Test discovery and selection.
//!
//! Run-tests live in a single directory, one subdirectory per test, named
//! `<numeric-prefix>-<name>` (for example `001-HelloWorld` or
//! `1339-dead-reference-safe`). Anything else in that directory (`etc/`,
//! helper scripts, ...) is not a test and is ignored.
//!
//! Builds are usually split into shards: a test belongs to shard `NN` when
//! its numeric prefix ends with `NN`, so shard `01` holds `001-HelloWorld`,
//! `101-fibonacci`, `1901-...` and so on.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Errors raised while discovering or selecting tests.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// The id does not have the `<digits>-<name>` shape.
    #[error("Invalid test id '{0}': expected <numeric-prefix>-<name>")]
    InvalidId(String),

    /// A test requested by id does not exist in the tests directory.
    #[error("Unknown test '{0}'")]
    UnknownTest(String),

    /// The shard pattern could not be compiled.
    #[error("Invalid shard pattern '{pattern}': {source}")]
    InvalidShard {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The tests directory could not be listed.
    #[error("Failed to read tests directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single run-test and the directory holding its sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// Test identifier, e.g. `001-HelloWorld`.
    pub id: String,

    /// Directory containing the test's sources.
    pub source_dir: PathBuf,

    /// Two-digit shard tag derived from the numeric prefix.
    pub shard: String,
}

impl TestCase {
    /// Creates a test case, validating the id.
    ///
    /// # Example
    ///
    /// ```
    /// use rtbuild::testcase::TestCase;
    ///
    /// let test = TestCase::new("001-HelloWorld", "/src/art/test/001-HelloWorld")?;
    /// assert_eq!(test.shard, "01");
    /// # Ok::<(), rtbuild::testcase::SelectionError>(())
    /// ```
    pub fn new(id: impl Into<String>, source_dir: impl Into<PathBuf>) -> Result<Self, SelectionError> {
        let id = id.into();
        let prefix = numeric_prefix(&id).ok_or_else(|| SelectionError::InvalidId(id.clone()))?;
        let shard = shard_tag(prefix);
        Ok(Self {
            id,
            source_dir: source_dir.into(),
            shard,
        })
    }

    /// Returns the numeric prefix of the id.
    pub fn prefix(&self) -> &str {
        // The id was validated in `new`.
        numeric_prefix(&self.id).unwrap_or_default()
    }
}

/// Returns the numeric prefix if `id` is a valid test id.
///
/// The name part must be non-empty and must not contain path separators, so
/// that an id can always be used as a single path component.
fn numeric_prefix(id: &str) -> Option<&str> {
    let (prefix, name) = id.split_once('-')?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return None;
    }
    Some(prefix)
}

fn shard_tag(prefix: &str) -> String {
    if prefix.len() >= 2 {
        prefix[prefix.len() - 2..].to_string()
    } else {
        format!("0{}", prefix)
    }
}

/// Returns `true` if `name` looks like a run-test directory name.
pub fn is_test_id(name: &str) -> bool {
    numeric_prefix(name).is_some()
}

/// Lists every test in `tests_dir`, sorted by id.
pub fn discover(tests_dir: &Path) -> Result<Vec<TestCase>, SelectionError> {
    let entries = std::fs::read_dir(tests_dir).map_err(|source| SelectionError::ReadDir {
        path: tests_dir.to_path_buf(),
        source,
    })?;

    let mut tests = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SelectionError::ReadDir {
            path: tests_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_test_id(&name) {
            debug!("Ignoring non-test directory {}", path.display());
            continue;
        }
        tests.push(TestCase::new(name, path)?);
    }

    tests.sort_by(|a, b| a.id.cmp(&b.id));
    debug!("Discovered {} tests in {}", tests.len(), tests_dir.display());
    Ok(tests)
}

/// Which tests of the tests directory a run builds.
///
/// An empty selection means every test. Otherwise a test is selected when it
/// matches any shard pattern or is named explicitly.
#[derive(Debug, Clone, Default)]
pub struct TestSelection {
    /// Shard patterns; `NN` selects tests whose prefix matches `^\d*NN`.
    pub shards: Vec<String>,

    /// Explicit test ids.
    pub ids: Vec<String>,
}

impl TestSelection {
    /// Returns `true` if nothing restricts the selection.
    pub fn is_all(&self) -> bool {
        self.shards.is_empty() && self.ids.is_empty()
    }

    /// Filters `tests`, keeping discovery order.
    ///
    /// # Errors
    ///
    /// Fails if a shard pattern is not a valid regex or an explicit id does
    /// not name a discovered test.
    pub fn apply(&self, tests: Vec<TestCase>) -> Result<Vec<TestCase>, SelectionError> {
        if self.is_all() {
            return Ok(tests);
        }

        let shard_patterns = self
            .shards
            .iter()
            .map(|shard| {
                Regex::new(&format!(r"^\d*(?:{})-", shard)).map_err(|source| {
                    SelectionError::InvalidShard {
                        pattern: shard.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let wanted: BTreeSet<&str> = self.ids.iter().map(String::as_str).collect();
        let known: BTreeSet<&str> = tests.iter().map(|t| t.id.as_str()).collect();
        if let Some(missing) = wanted.iter().find(|id| !known.contains(*id)) {
            return Err(SelectionError::UnknownTest(missing.to_string()));
        }

        Ok(tests
            .into_iter()
            .filter(|t| {
                wanted.contains(t.id.as_str()) || shard_patterns.iter().any(|re| re.is_match(&t.id))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn case(id: &str) -> TestCase {
        TestCase::new(id, format!("/tests/{}", id)).unwrap()
    }

    #[test]
    fn test_valid_ids() {
        assert!(is_test_id("001-HelloWorld"));
        assert!(is_test_id("1339-dead-reference-safe"));
        assert!(is_test_id("5-x"));
    }

    #[test]
    fn test_invalid_ids() {
        assert!(!is_test_id("etc"));
        assert!(!is_test_id("HelloWorld-001"));
        assert!(!is_test_id("001-"));
        assert!(!is_test_id("-foo"));
        assert!(!is_test_id("001-a/b"));
        assert!(!is_test_id("001-.."));
        assert!(matches!(
            TestCase::new("bogus", "/x"),
            Err(SelectionError::InvalidId(_))
        ));
    }

    #[test]
    fn test_shard_tag() {
        assert_eq!(case("001-HelloWorld").shard, "01");
        assert_eq!(case("1339-dead-reference-safe").shard, "39");
        assert_eq!(case("5-x").shard, "05");
        assert_eq!(case("1339-dead-reference-safe").prefix(), "1339");
    }

    #[test]
    fn test_select_all_when_empty() {
        let tests = vec![case("001-a"), case("002-b")];
        let selected = TestSelection::default().apply(tests.clone()).unwrap();
        assert_eq!(selected, tests);
    }

    #[test]
    fn test_select_by_shard() {
        let tests = vec![
            case("001-HelloWorld"),
            case("002-sleep"),
            case("101-fibonacci"),
            case("1901-get-bytecodes"),
            case("010-instance"),
        ];
        let selection = TestSelection {
            shards: vec!["01".to_string()],
            ids: vec![],
        };
        let ids: Vec<_> = selection
            .apply(tests)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["001-HelloWorld", "101-fibonacci", "1901-get-bytecodes"]);
    }

    #[test]
    fn test_select_union_of_shard_and_ids() {
        let tests = vec![case("001-a"), case("002-b"), case("003-c")];
        let selection = TestSelection {
            shards: vec!["02".to_string()],
            ids: vec!["003-c".to_string()],
        };
        let ids: Vec<_> = selection
            .apply(tests)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["002-b", "003-c"]);
    }

    #[test]
    fn test_select_unknown_id() {
        let selection = TestSelection {
            shards: vec![],
            ids: vec!["999-missing".to_string()],
        };
        match selection.apply(vec![case("001-a")]) {
            Err(SelectionError::UnknownTest(id)) => assert_eq!(id, "999-missing"),
            other => panic!("Expected UnknownTest, got {:?}", other),
        }
    }

    #[test]
    fn test_select_invalid_shard() {
        let selection = TestSelection {
            shards: vec!["(".to_string()],
            ids: vec![],
        };
        assert!(matches!(
            selection.apply(vec![case("001-a")]),
            Err(SelectionError::InvalidShard { .. })
        ));
    }

    #[test]
    fn test_discover_skips_non_tests() {
        let dir = TempDir::new().unwrap();
        for name in ["002-b", "001-a", "etc", "testrunner"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("003-not-a-dir"), "x").unwrap();

        let tests = discover(dir.path()).unwrap();
        let ids: Vec<_> = tests.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["001-a", "002-b"]);
        assert_eq!(tests[0].source_dir, dir.path().join("001-a"));
    }

    #[test]
    fn test_discover_missing_dir() {
        assert!(matches!(
            discover(Path::new("/nonexistent/tests/dir")),
            Err(SelectionError::ReadDir { .. })
        ));
    }
}
