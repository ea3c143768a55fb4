//! Packaging of the sandbox root.
//!
//! After a successful run the whole sandbox root is archived into one
//! artifact. The archiver never writes to the final path directly: it
//! writes a temporary file next to it, which is renamed into place only
//! once the archiver has succeeded. A failed or interrupted packaging step
//! therefore never leaves a file at the output path.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{ArchiverConfig, Config};

/// Errors raised while producing the artifact.
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("Sandbox root {0} does not exist")]
    RootMissing(PathBuf),

    #[error("Output {out} must not be inside the sandbox root {root}")]
    OutputInsideRoot { out: PathBuf, root: PathBuf },

    #[error("Invalid archiver command '{command}': {reason}")]
    InvalidCommand { command: String, reason: String },

    #[error("Failed to start archiver {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archiver exited with code {exit_code}:\n{output}")]
    ArchiverFailed { exit_code: i32, output: String },

    #[error("Failed to write archive: {0}")]
    Archive(#[source] std::io::Error),

    #[error("Packaging I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes an archive of a directory tree.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Archives the contents of `root` into the file `out`.
    ///
    /// `out` may already exist as an empty file and must be overwritten.
    async fn archive(&self, root: &Path, out: &Path) -> Result<(), PackagingError>;
}

/// Runs an external archiving command.
///
/// The command is a template split with shell quoting rules. Each argument
/// has `{out}`, `{root}` and `{soong_zip}` substituted before the command
/// runs; no shell is involved.
#[derive(Debug, Clone)]
pub struct ExternalArchiver {
    template: Vec<String>,
    soong_zip: PathBuf,
}

impl ExternalArchiver {
    pub fn new(command: &str, soong_zip: impl Into<PathBuf>) -> Result<Self, PackagingError> {
        let invalid = |reason: String| PackagingError::InvalidCommand {
            command: command.to_string(),
            reason,
        };
        let template = shell_words::split(command).map_err(|e| invalid(e.to_string()))?;
        if template.is_empty() {
            return Err(invalid("command is empty".to_string()));
        }
        Ok(Self {
            template,
            soong_zip: soong_zip.into(),
        })
    }

    /// The command line for one invocation.
    pub fn command_line(&self, root: &Path, out: &Path) -> Vec<String> {
        let root = root.display().to_string();
        let out = out.display().to_string();
        let soong_zip = self.soong_zip.display().to_string();
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{out}", &out)
                    .replace("{root}", &root)
                    .replace("{soong_zip}", &soong_zip)
            })
            .collect()
    }
}

#[async_trait]
impl Archiver for ExternalArchiver {
    fn name(&self) -> &str {
        "external"
    }

    async fn archive(&self, root: &Path, out: &Path) -> Result<(), PackagingError> {
        let argv = self.command_line(root, out);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PackagingError::InvalidCommand {
                command: String::new(),
                reason: "command is empty".to_string(),
            })?;

        debug!("Running archiver: {}", shell_words::join(&argv));
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| PackagingError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(PackagingError::ArchiverFailed {
                exit_code: output.status.code().unwrap_or(-1),
                output: text,
            });
        }
        Ok(())
    }
}

/// Writes a tar archive in-process.
///
/// Entries are sorted by path and written with a fixed timestamp and zero
/// owner ids, so the same tree always produces the same bytes. Directories
/// and executable files are stored as `0755`, other files as `0644`.
#[derive(Debug, Clone, Default)]
pub struct TarArchiver;

impl TarArchiver {
    fn write(root: &Path, out: &Path) -> std::io::Result<()> {
        let file = std::fs::File::create(out)?;
        let mut builder = tar::Builder::new(std::io::BufWriter::new(file));
        builder.mode(tar::HeaderMode::Deterministic);
        builder.follow_symlinks(false);

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            builder.append_path_with_name(entry.path(), relative)?;
        }

        let mut writer = builder.into_inner()?;
        std::io::Write::flush(&mut writer)?;
        Ok(())
    }
}

#[async_trait]
impl Archiver for TarArchiver {
    fn name(&self) -> &str {
        "tar"
    }

    async fn archive(&self, root: &Path, out: &Path) -> Result<(), PackagingError> {
        let root = root.to_path_buf();
        let out = out.to_path_buf();
        tokio::task::spawn_blocking(move || Self::write(&root, &out))
            .await
            .map_err(|e| PackagingError::Archive(std::io::Error::other(e)))?
            .map_err(PackagingError::Archive)
    }
}

/// The packaged sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-256 of the file.
    pub sha256: String,
}

/// Archives a sandbox root into an artifact.
pub struct Packager {
    archiver: Box<dyn Archiver>,
}

impl Packager {
    pub fn new(archiver: Box<dyn Archiver>) -> Self {
        Self { archiver }
    }

    /// Builds the packager selected by `[package]` in the config.
    pub fn from_config(config: &Config) -> Result<Self, PackagingError> {
        let archiver: Box<dyn Archiver> = match &config.package.archiver {
            ArchiverConfig::External { command } => {
                Box::new(ExternalArchiver::new(command, config.soong_zip())?)
            }
            ArchiverConfig::Tar => Box::new(TarArchiver),
        };
        Ok(Self::new(archiver))
    }

    /// Archives `root` to `out`.
    ///
    /// # Errors
    ///
    /// Fails if `root` is missing, `out` lies inside `root`, or the archiver
    /// fails. On failure nothing is left at `out` and the temporary file is
    /// removed.
    pub async fn package(&self, root: &Path, out: &Path) -> Result<Artifact, PackagingError> {
        let (root, out, partial) = blocking(out, {
            let (root, out) = (root.to_path_buf(), out.to_path_buf());
            move || prepare(&root, &out)
        })
        .await?;

        info!(
            "Packaging {} with the {} archiver",
            root.display(),
            self.archiver.name()
        );
        // On error `partial` is dropped here, which deletes it.
        self.archiver.archive(&root, partial.path()).await?;

        let path = out.clone();
        let artifact = blocking(&path, move || finish(partial, out)).await?;
        info!(
            "Wrote {} ({} bytes, sha256 {})",
            artifact.path.display(),
            artifact.size,
            artifact.sha256
        );
        Ok(artifact)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PackagingError + use<> {
    let path = path.to_path_buf();
    move |source| PackagingError::Io { path, source }
}

/// Runs filesystem work on the blocking pool.
async fn blocking<T, F>(path: &Path, f: F) -> Result<T, PackagingError>
where
    F: FnOnce() -> Result<T, PackagingError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io_err(path)(std::io::Error::other(e)))?
}

/// Checks the paths and creates the partial file next to `out`.
fn prepare(root: &Path, out: &Path) -> Result<(PathBuf, PathBuf, NamedTempFile), PackagingError> {
    if !root.is_dir() {
        return Err(PackagingError::RootMissing(root.to_path_buf()));
    }
    let root = std::path::absolute(root).map_err(io_err(root))?;
    let out = std::path::absolute(out).map_err(io_err(out))?;
    if out.starts_with(&root) {
        return Err(PackagingError::OutputInsideRoot { out, root });
    }

    let dir = out.parent().unwrap_or(Path::new("/"));
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    let partial = tempfile::Builder::new()
        .prefix(".rtbuild-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(io_err(dir))?;
    Ok((root, out, partial))
}

/// Moves the finished archive over `out` and digests it.
fn finish(partial: NamedTempFile, out: PathBuf) -> Result<Artifact, PackagingError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(partial.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(io_err(partial.path()))?;
    }

    partial.persist(&out).map_err(|e| PackagingError::Io {
        path: out.clone(),
        source: e.error,
    })?;

    let (size, sha256) = digest(&out).map_err(io_err(&out))?;
    Ok(Artifact {
        path: out,
        size,
        sha256,
    })
}

fn digest(path: &Path) -> std::io::Result<(u64, String)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let hash: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    Ok((size, hash))
}
