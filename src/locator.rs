//! Runtime executable lookup
//!
//! Finds the runtime that runs the host entry point by probing each
//! directory of the search path.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Find `name` on the current process's `PATH`
pub fn find_runtime(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    find_in_path(name, &path_var)
}

/// Find `name` in the directories listed by a search-path value
///
/// A name that already contains a path separator is treated as a path
/// and only checked for existence.
pub fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        log::trace!("Checking for runtime at {}", direct.display());
        return direct.is_file().then(|| direct.to_path_buf());
    }

    let exe_name = executable_name(name);
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(&exe_name))
        .find(|candidate| {
            log::trace!("Checking for runtime at {}", candidate.display());
            candidate.is_file()
        })
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) && !name.to_ascii_lowercase().ends_with(".exe") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}
