//! Staged update application
//!
//! After the host exits asking for a restart, the update path may hold a
//! complete replacement payload. It is swapped in with two renames:
//!
//! 1. installed payload -> unique temp sibling
//! 2. staged update     -> installed payload
//!
//! If (1) fails nothing has changed and the update is abandoned. If (2)
//! fails the temp copy is renamed back. Either way the installed payload is
//! always a complete version, old or new.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::platform::PlatformTraits;

/// Filesystem mutations used during a swap
pub trait PayloadFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// [`PayloadFs`] backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl PayloadFs for StdFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Result of an update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No update directory was staged
    NoUpdate,
    /// The staged update is now installed
    Applied,
    /// The installed payload could not be moved aside; nothing changed
    Abandoned,
    /// The staged update could not be moved in; previous version restored
    Reverted,
}

/// Swaps staged updates into the installed payload directory
pub struct UpdateApplier<F = StdFs> {
    fs: F,
    settle: Option<Duration>,
}

impl UpdateApplier<StdFs> {
    pub fn new(traits: &PlatformTraits) -> Self {
        Self::with_fs(StdFs, traits.post_exit_settle)
    }
}

impl<F: PayloadFs> UpdateApplier<F> {
    pub fn with_fs(fs: F, settle: Option<Duration>) -> Self {
        Self { fs, settle }
    }

    /// Install the update staged at `staged`, if any, into `installed`
    ///
    /// Must only be called while no host is running.
    pub async fn apply(
        &self,
        staged: &Path,
        installed: &Path,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome, UpdateError> {
        if !staged.is_dir() {
            log::debug!("No update staged at {}", staged.display());
            return Ok(UpdateOutcome::NoUpdate);
        }

        log::info!("Applying host update from {}", staged.display());

        if let Some(delay) = self.settle {
            log::debug!("Waiting {:?} for host file handles to be released", delay);
            tokio::select! {
                _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let temp = unique_sibling(installed);
        if let Err(e) = self.fs.rename(installed, &temp) {
            log::warn!(
                "Failed to move out active host payload {}: {}",
                installed.display(),
                e
            );
            return Ok(UpdateOutcome::Abandoned);
        }

        match self.fs.rename(staged, installed) {
            Ok(()) => {
                log::info!("Host update complete, deleting old payload");
                if let Err(e) = self.fs.remove_dir_all(&temp) {
                    log::warn!("Error deleting old payload at {}: {}", temp.display(), e);
                }
                Ok(UpdateOutcome::Applied)
            }
            Err(e) => {
                log::error!(
                    "Error moving updated payload into {}, attempting revert: {}",
                    installed.display(),
                    e
                );
                self.revert(&temp, installed)?;
                log::error!(
                    "Revert successful, {} is back to the previous version",
                    installed.display()
                );
                Ok(UpdateOutcome::Reverted)
            }
        }
    }

    fn revert(&self, temp: &Path, installed: &Path) -> Result<(), UpdateError> {
        let failed = |source| UpdateError::RevertFailed {
            installed: installed.to_path_buf(),
            previous: temp.to_path_buf(),
            source,
        };

        // Partial state left by the failed rename may be a file or a link
        if let Ok(meta) = installed.symlink_metadata() {
            if meta.file_type().is_dir() {
                self.fs.remove_dir_all(installed).map_err(failed)?;
            } else {
                self.fs.remove_file(installed).map_err(failed)?;
            }
        }
        self.fs.rename(temp, installed).map_err(failed)
    }
}

/// Fresh path next to `path` with a random name
pub fn unique_sibling(path: &Path) -> PathBuf {
    path.with_file_name(Uuid::new_v4().to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Update cancelled before it was applied")]
    Cancelled,

    #[error(
        "Failed to restore previous payload {} to {}, installation is in an unknown state: {source}",
        previous.display(),
        installed.display()
    )]
    RevertFailed {
        installed: PathBuf,
        previous: PathBuf,
        #[source]
        source: io::Error,
    },
}
