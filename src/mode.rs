//! Build modes.
//!
//! Every test is built once per requested mode. The mode decides the flag
//! handed to the test's `build` script, the sandbox subdirectory the test is
//! staged into, and whether the script has to produce dex output.
//!
//! | Mode | Flag | Dex output | Boot classpath |
//! |------|------|------------|----------------|
//! | `host` | `--host` | yes | ART boot classpath |
//! | `target` | `--target` | yes | ART boot classpath |
//! | `jvm` | `--jvm` | no | JDK default |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An execution context a test is built for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// ART running on the build host.
    Host,
    /// ART running on a device.
    Target,
    /// A reference JVM.
    Jvm,
}

impl BuildMode {
    /// All modes, in the order they are built when none is requested.
    pub const ALL: [BuildMode; 3] = [BuildMode::Host, BuildMode::Target, BuildMode::Jvm];

    /// The mode name as used in known-failure variants and sandbox paths.
    pub fn as_str(self) -> &'static str {
        match self {
            BuildMode::Host => "host",
            BuildMode::Target => "target",
            BuildMode::Jvm => "jvm",
        }
    }

    /// The single argument passed to a test's `build` script.
    pub fn flag(self) -> String {
        format!("--{}", self.as_str())
    }

    /// Whether the build has to produce dex files.
    pub fn needs_dex(self) -> bool {
        !matches!(self, BuildMode::Jvm)
    }

    /// Whether sources are compiled against the ART boot classpath rather
    /// than the JDK's own classes.
    pub fn uses_boot_classpath(self) -> bool {
        !matches!(self, BuildMode::Jvm)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown build mode '{0}' (expected host, target or jvm)")]
pub struct UnknownMode(pub String);

impl FromStr for BuildMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(BuildMode::Host),
            "target" => Ok(BuildMode::Target),
            "jvm" => Ok(BuildMode::Jvm),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert_eq!(BuildMode::Host.flag(), "--host");
        assert_eq!(BuildMode::Target.flag(), "--target");
        assert_eq!(BuildMode::Jvm.flag(), "--jvm");
    }

    #[test]
    fn test_needs_dex() {
        assert!(BuildMode::Host.needs_dex());
        assert!(BuildMode::Target.needs_dex());
        assert!(!BuildMode::Jvm.needs_dex());
    }

    #[test]
    fn test_parse_round_trips_names() {
        for mode in BuildMode::ALL {
            assert_eq!(mode.as_str().parse::<BuildMode>(), Ok(mode));
        }
        assert!("debug".parse::<BuildMode>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let mode: BuildMode = serde_json::from_str("\"jvm\"").unwrap();
        assert_eq!(mode, BuildMode::Jvm);
        assert_eq!(serde_json::to_string(&BuildMode::Target).unwrap(), "\"target\"");
    }
}
