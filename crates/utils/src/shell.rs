//! Executable resolution for subprocess spawning.

use std::path::PathBuf;

/// Resolve an executable name to an absolute path via `PATH`.
///
/// Absolute and relative paths are passed through `which` unchanged, so
/// configured binaries may be given either as bare names or full paths.
pub fn resolve_executable_path(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
