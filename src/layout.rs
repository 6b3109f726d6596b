//! Installation layout
//!
//! ```text
//! <root>/
//! ├── hostvisor            supervisor binary
//! ├── appsettings.yml      root configuration, read by the host
//! └── lib/
//!     ├── Default/         installed payload
//!     │   └── <host entry>
//!     └── <uuid>           per-invocation update paths, swap temp dirs
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Payload storage directory name, under the root
pub const STORAGE_DIR: &str = "lib";

/// Installed payload directory name, under the storage directory
pub const PAYLOAD_DIR: &str = "Default";

/// Root configuration file the host reads from its working directory
pub const ROOT_CONFIG_FILE: &str = "appsettings.yml";

/// Host entry point handed to the runtime
pub const DEFAULT_HOST_ENTRY: &str = "Tgstation.Server.Host.dll";

/// Resolved paths of an installation
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    host_entry: String,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, host_entry: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            host_entry: host_entry.into(),
        }
    }

    /// Layout rooted next to the running supervisor executable
    pub fn beside_executable(host_entry: impl Into<String>) -> Result<Self, LayoutError> {
        let exe = std::env::current_exe().map_err(|e| LayoutError::io("current executable", e))?;
        let root = exe.parent().ok_or(LayoutError::NoRoot)?.to_path_buf();
        Ok(Self::new(root, host_entry))
    }

    /// Installation root, also the host's working directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.root.join(STORAGE_DIR)
    }

    /// Directory every invocation runs the host from
    pub fn payload_dir(&self) -> PathBuf {
        self.storage_dir().join(PAYLOAD_DIR)
    }

    pub fn host_entry_path(&self) -> PathBuf {
        self.payload_dir().join(&self.host_entry)
    }

    pub fn root_config_path(&self) -> PathBuf {
        self.root.join(ROOT_CONFIG_FILE)
    }

    /// Make the root absolute and create the storage directory
    pub fn prepare(&mut self) -> Result<(), LayoutError> {
        self.root = std::path::absolute(&self.root).map_err(|e| LayoutError::io(&self.root, e))?;
        let storage = self.storage_dir();
        fs::create_dir_all(&storage).map_err(|e| LayoutError::io(&storage, e))
    }

    /// Check the host entry point can be launched
    pub fn validate(&self) -> Result<(), LayoutError> {
        let entry = self.host_entry_path();
        if entry.to_string_lossy().contains('"') {
            return Err(LayoutError::QuoteInPath(entry));
        }
        if !entry.is_file() {
            return Err(LayoutError::HostEntryMissing(entry));
        }
        Ok(())
    }

    /// Replace the installed payload with a copy of a development build
    ///
    /// The build's root configuration file is moved next to the supervisor,
    /// where the host expects it.
    pub fn bootstrap_dev_payload(&self, source: &Path) -> Result<(), LayoutError> {
        let storage = self.storage_dir();
        let payload = self.payload_dir();
        log::info!(
            "Refreshing {} from development build {}",
            payload.display(),
            source.display()
        );

        match fs::remove_dir_all(&storage) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LayoutError::io(&storage, e)),
        }
        fs::create_dir_all(&payload).map_err(|e| LayoutError::io(&payload, e))?;

        let copied = copy_tree(source, &payload)?;
        log::debug!("Copied {} files into {}", copied, payload.display());

        let staged_config = payload.join(ROOT_CONFIG_FILE);
        if staged_config.is_file() {
            let root_config = self.root_config_path();
            match fs::remove_file(&root_config) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(LayoutError::io(&root_config, e)),
            }
            fs::rename(&staged_config, &root_config)
                .map_err(|e| LayoutError::io(&root_config, e))?;
        }

        Ok(())
    }
}

/// Recursively copy `source` into `dest`, returning the number of files copied
fn copy_tree(source: &Path, dest: &Path) -> Result<usize, LayoutError> {
    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            LayoutError::io(path, io::Error::other(e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| LayoutError::NoRoot)?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| LayoutError::io(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| LayoutError::io(&target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Cannot determine installation root")]
    NoRoot,

    #[error("Running from paths with \"'s in the name is not supported: {}", .0.display())]
    QuoteInPath(PathBuf),

    #[error("Unable to locate host entry point at {}", .0.display())]
    HostEntryMissing(PathBuf),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LayoutError {
    fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
