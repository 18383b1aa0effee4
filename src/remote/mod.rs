//! Access to the host that stores the package repositories.
//!
//! Repository operations are written against [`RemoteFileOps`]. Paths passed
//! to it are paths on the repository host and always use `/` separators.
//! [`SshRemote`] reaches the host over ssh and rsync; [`LocalHost`] works on
//! the local filesystem and is used for `localhost` targets and tests.

pub mod repogen;
pub mod repository;
pub mod safety;
pub mod ssh;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::runner::{run_command, CommandOutput};

pub use repogen::check_repogen_output;
pub use repository::{RemoteRepository, UpdateOutcome, BACKUP_SUFFIX};
pub use safety::{is_safe_repo_directory, normalize_remote_path};
pub use ssh::{has_connection_error, RetryPolicy, SshRemote};

/// Operations the repository layer needs from the repository host.
pub trait RemoteFileOps {
    /// Short name for log lines, e.g. `user@host`.
    fn describe(&self) -> String;

    fn dir_exists(&self, path: &str) -> Result<bool>;

    fn file_exists(&self, path: &str) -> Result<bool>;

    /// `mkdir -p` every path.
    fn create_dirs(&self, paths: &[String]) -> Result<()>;

    /// `rm -rf` every path.
    fn delete_paths(&self, paths: &[String]) -> Result<()>;

    /// Copy everything inside `source` into the existing directory `target`.
    fn copy_tree_contents(&self, source: &str, target: &str) -> Result<()>;

    /// Entry names of a directory, sorted.
    fn list_dir(&self, path: &str) -> Result<Vec<String>>;

    /// Every path below `path`, relative to it with `/` separators, sorted.
    fn list_tree(&self, path: &str) -> Result<Vec<String>>;

    /// File content, `None` when the file does not exist.
    fn read_to_string(&self, path: &str) -> Result<Option<String>>;

    /// Transfer the contents of a local directory into `dest`.
    fn upload_dir(&self, local_source: &Path, dest: &str) -> Result<()>;

    /// Run a program on the host.
    fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput>;
}

/// Join remote path fragments with a single `/`.
pub fn remote_join(base: &str, tail: &str) -> String {
    if base.is_empty() {
        return tail.to_string();
    }
    if tail.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), tail.trim_start_matches('/'))
}

/// Parent directory of a remote path, `/` for top-level entries.
pub fn remote_parent(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// The local filesystem acting as the repository host.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalHost;

impl LocalHost {
    fn copy_recursive(source: &Path, target: &Path) -> Result<()> {
        for entry in WalkDir::new(source).min_depth(1) {
            let entry = entry.map_err(|e| {
                Error::packaging(format!("walking {}: {}", source.display(), e))
            })?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| Error::packaging(e.to_string()))?;
            let dest = target.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest).map_err(|e| Error::path(&dest, e))?;
            } else {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::path(parent, e))?;
                }
                fs::copy(entry.path(), &dest).map_err(|e| Error::path(entry.path(), e))?;
            }
        }
        Ok(())
    }
}

impl RemoteFileOps for LocalHost {
    fn describe(&self) -> String {
        "localhost".to_string()
    }

    fn dir_exists(&self, path: &str) -> Result<bool> {
        Ok(Path::new(path).is_dir())
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(Path::new(path).is_file())
    }

    fn create_dirs(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            fs::create_dir_all(path).map_err(|e| Error::path(path, e))?;
        }
        Ok(())
    }

    fn delete_paths(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            let p = Path::new(path);
            let result = if p.is_dir() {
                fs::remove_dir_all(p)
            } else if p.exists() || p.is_symlink() {
                fs::remove_file(p)
            } else {
                Ok(())
            };
            result.map_err(|e| Error::path(p, e))?;
        }
        Ok(())
    }

    fn copy_tree_contents(&self, source: &str, target: &str) -> Result<()> {
        Self::copy_recursive(Path::new(source), Path::new(target))
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let mut names = fs::read_dir(path)
            .map_err(|e| Error::path(path, e))?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| Error::path(path, e))?;
        names.sort();
        Ok(names)
    }

    fn list_tree(&self, path: &str) -> Result<Vec<String>> {
        let root = Path::new(path);
        let mut entries = Vec::new();
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry.map_err(|e| Error::packaging(format!("walking {}: {}", path, e)))?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::packaging(e.to_string()))?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            entries.push(parts.join("/"));
        }
        entries.sort();
        Ok(entries)
    }

    fn read_to_string(&self, path: &str) -> Result<Option<String>> {
        let p = PathBuf::from(path);
        if !p.is_file() {
            return Ok(None);
        }
        fs::read_to_string(&p).map(Some).map_err(|e| Error::path(p, e))
    }

    fn upload_dir(&self, local_source: &Path, dest: &str) -> Result<()> {
        if !local_source.is_dir() {
            return Err(Error::packaging(format!(
                "upload source is not a directory: {}",
                local_source.display()
            )));
        }
        fs::create_dir_all(dest).map_err(|e| Error::path(dest, e))?;
        Self::copy_recursive(local_source, Path::new(dest))
    }

    fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        run_command(program, args, None, Some(timeout))
    }
}
