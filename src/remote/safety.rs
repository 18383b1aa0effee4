//! Guard against creating or deleting repository trees in system locations.

use crate::error::{Error, Result};
use crate::platform::PlatformInfo;

/// Top-level directories nothing may be created in or deleted from.
pub const SYSTEM_DIRECTORIES: &[&str] = &["bin", "boot", "dev", "lib", "proc", "root", "sbin", "sys"];

/// Absolute, `/`-separated form of `path` with `.` and `..` collapsed lexically.
///
/// A leading `~` expands to the home directory. Relative paths are taken
/// relative to the current directory.
pub fn normalize_remote_path(path: &str, platform: &PlatformInfo) -> Result<String> {
    let path = path.replace('\\', "/");
    let home = platform
        .home_dir()
        .map(|h| h.to_string_lossy().replace('\\', "/"));

    let expanded = match &home {
        Some(home) if path == "~" || path.starts_with("~/") => format!("{}{}", home, &path[1..]),
        _ => path,
    };
    let absolute = if expanded.starts_with('/') {
        expanded
    } else {
        let cwd = std::env::current_dir()?;
        format!("{}/{}", cwd.to_string_lossy().replace('\\', "/"), expanded)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in absolute.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Fail with a packaging error when any path is unsafe to modify.
///
/// Rejected: empty paths, `~`, the root, direct children of the root,
/// anything inside [`SYSTEM_DIRECTORIES`] and the home directory itself.
pub fn is_safe_repo_directory<S: AsRef<str>>(paths: &[S], platform: &PlatformInfo) -> Result<()> {
    let home = match platform.home_dir() {
        Some(home) => Some(normalize_remote_path(&home.to_string_lossy(), platform)?),
        None => None,
    };

    for raw in paths {
        let raw = raw.as_ref();
        if raw.trim().is_empty() || raw.trim() == "~" {
            return Err(Error::packaging(format!(
                "refusing to modify the home directory or an empty path: '{}'",
                raw
            )));
        }
        let path = normalize_remote_path(raw, platform)?;
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        if parts.is_empty() {
            return Err(Error::packaging(format!(
                "refusing to modify the root directory: {}",
                path
            )));
        }
        if SYSTEM_DIRECTORIES.contains(&parts[0]) {
            return Err(Error::packaging(format!(
                "refusing to modify '{}' under system directories {:?}",
                path, SYSTEM_DIRECTORIES
            )));
        }
        if parts.len() == 1 {
            return Err(Error::packaging(format!(
                "refusing to modify a top-level directory: {}",
                path
            )));
        }
        if home.as_deref() == Some(path.as_str()) {
            return Err(Error::packaging(format!(
                "refusing to modify the home directory: {}",
                path
            )));
        }
    }
    Ok(())
}
