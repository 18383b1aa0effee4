//! Host tool checks run before anything touches the repository host.
//!
//! A missing `rsync` otherwise shows up halfway through a publish run, after
//! the pending area was already modified.
//!
//! # Example
//!
//! ```rust,ignore
//! use sdk_packager::preflight::{check_required_tools, PUBLISH_TOOLS};
//!
//! if let Err(e) = check_required_tools(PUBLISH_TOOLS) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::error::{Error, Result};

/// Locate `cmd` in `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools needed to publish to a remote repository host, as (command, package).
pub const PUBLISH_TOOLS: &[(&str, &str)] = &[("ssh", "openssh-client"), ("rsync", "rsync")];

/// Tools needed to unpack `.7z` and `.zip` installer-framework archives.
pub const EXTRACT_TOOLS: &[(&str, &str)] = &[("7z", "p7zip-full")];

/// Fail with the list of missing tools and the packages that provide them.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect();

    if !missing.is_empty() {
        return Err(Error::configuration(format!(
            "Missing required host tools:\n{}",
            missing.join("\n")
        )));
    }
    Ok(())
}

/// Check the tools a publish run needs.
pub fn check_host_tools() -> Result<()> {
    check_required_tools(PUBLISH_TOOLS)
}
