//! Host platform description passed to everything that depends on the OS.
//!
//! Built once at startup with [`PlatformInfo::detect`] and handed down by
//! reference. Tests construct fixed values with [`PlatformInfo::new`].

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl OsFamily {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => OsFamily::Linux,
            "macos" => OsFamily::MacOs,
            "windows" => OsFamily::Windows,
            _ => OsFamily::Other,
        }
    }

    /// Suffix for executables built for this family.
    pub fn exe_suffix(self) -> &'static str {
        match self {
            OsFamily::Windows => ".exe",
            _ => "",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::MacOs => write!(f, "macos"),
            OsFamily::Windows => write!(f, "windows"),
            OsFamily::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    os: OsFamily,
    home_dir: Option<PathBuf>,
}

impl PlatformInfo {
    pub fn new(os: OsFamily, home_dir: Option<PathBuf>) -> Self {
        Self { os, home_dir }
    }

    pub fn detect() -> Self {
        Self::new(OsFamily::current(), dirs::home_dir())
    }

    pub fn os(&self) -> OsFamily {
        self.os
    }

    pub fn home_dir(&self) -> Option<&Path> {
        self.home_dir.as_deref()
    }

    pub fn is_windows(&self) -> bool {
        self.os == OsFamily::Windows
    }

    /// Executable file name for `tool` on this platform.
    pub fn executable_name(&self, tool: &str) -> String {
        format!("{}{}", tool, self.os.exe_suffix())
    }
}
