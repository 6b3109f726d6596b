//! One launch-to-exit cycle of the host
//!
//! Each invocation gets a fresh update path under payload storage. What
//! ends up at that path depends on how the host exits:
//!
//! - directory: a complete staged update (restart requested)
//! - file: diagnostics of a fatal host error, or the supervisor's shutdown
//!   sentinel
//! - nothing: no update

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Text reported when the host exits with an error but left no diagnostics
const MISSING_DIAGNOSTICS: &str = "(NOT PRESENT)";

pub struct Invocation {
    number: u64,
    update_path: PathBuf,
}

impl Invocation {
    /// New invocation with a unique update path inside `storage_dir`
    pub fn new(number: u64, storage_dir: &Path) -> Self {
        Self {
            number,
            update_path: storage_dir.join(Uuid::new_v4().to_string()),
        }
    }

    /// 1-based position in the supervisor loop
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn update_path(&self) -> &Path {
        &self.update_path
    }

    /// Tell the host a shutdown is in progress
    ///
    /// Writes an empty sentinel file at the update path so the host does not
    /// start staging an update. A directory already there is an update in
    /// progress and is left alone.
    pub fn claim_for_shutdown(&self) {
        if self.update_path.is_dir() {
            log::warn!(
                "Cancellation requested while update directory {} exists",
                self.update_path.display()
            );
            return;
        }

        log::info!("Cancellation requested, writing shutdown lock file");
        if let Err(e) = fs::write(&self.update_path, b"") {
            log::warn!(
                "Failed to write shutdown lock file {}: {}",
                self.update_path.display(),
                e
            );
        }
    }

    /// Read and delete the diagnostics of a fatal host error
    pub fn take_diagnostics(&self) -> String {
        if !self.update_path.is_file() {
            return MISSING_DIAGNOSTICS.to_string();
        }

        let data = match fs::read_to_string(&self.update_path) {
            Ok(data) => data,
            Err(e) => {
                log::warn!(
                    "Unable to read diagnostics at {}: {}",
                    self.update_path.display(),
                    e
                );
                MISSING_DIAGNOSTICS.to_string()
            }
        };

        if let Err(e) = fs::remove_file(&self.update_path) {
            log::warn!(
                "Unable to delete diagnostics file at {}: {}",
                self.update_path.display(),
                e
            );
        }

        data
    }

    /// Remove whatever is at the update path, sentinel file or whole update tree
    pub fn discard(&self) {
        let result = if self.update_path.is_dir() {
            fs::remove_dir_all(&self.update_path)
        } else {
            fs::remove_file(&self.update_path)
        };

        match result {
            Ok(()) => log::debug!("Removed {}", self.update_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", self.update_path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_update_paths() {
        let dir = tempfile::tempdir().unwrap();
        let a = Invocation::new(1, dir.path());
        let b = Invocation::new(2, dir.path());
        assert_ne!(a.update_path(), b.update_path());
        assert_eq!(a.update_path().parent(), Some(dir.path()));
        assert!(!a.update_path().exists());
    }

    #[test]
    fn test_claim_writes_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = Invocation::new(1, dir.path());
        invocation.claim_for_shutdown();
        assert!(invocation.update_path().is_file());
        assert_eq!(fs::read(invocation.update_path()).unwrap().len(), 0);
    }

    #[test]
    fn test_claim_leaves_staged_update() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = Invocation::new(1, dir.path());
        fs::create_dir(invocation.update_path()).unwrap();
        fs::write(invocation.update_path().join("host.dll"), "v2").unwrap();

        invocation.claim_for_shutdown();
        assert!(invocation.update_path().is_dir());
        assert!(invocation.update_path().join("host.dll").is_file());
    }

    #[test]
    fn test_take_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = Invocation::new(1, dir.path());
        assert_eq!(invocation.take_diagnostics(), MISSING_DIAGNOSTICS);

        fs::write(invocation.update_path(), "database unreachable").unwrap();
        assert_eq!(invocation.take_diagnostics(), "database unreachable");
        assert!(!invocation.update_path().exists());
    }

    #[test]
    fn test_discard() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = Invocation::new(1, dir.path());
        // Nothing there yet
        invocation.discard();

        fs::write(invocation.update_path(), "").unwrap();
        invocation.discard();
        assert!(!invocation.update_path().exists());

        fs::create_dir_all(invocation.update_path().join("nested")).unwrap();
        invocation.discard();
        assert!(!invocation.update_path().exists());
    }
}
