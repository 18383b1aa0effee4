//! Classification of repository generator output.

use crate::error::{Error, Result};

/// Substrings that mark a failed repogen run, matched case-insensitively.
const FAILURE_MARKERS: &[&str] = &["error", "invalid", "already exists"];

/// Fail when the output of `repogen` reports a problem.
///
/// Anything that does not contain a known failure marker counts as success.
pub fn check_repogen_output(output: &str) -> Result<()> {
    let normalized = output.trim().to_lowercase();
    if FAILURE_MARKERS.iter().any(|marker| normalized.contains(marker)) {
        return Err(Error::packaging(format!("Repogen failed: {}", output.trim())));
    }
    Ok(())
}
