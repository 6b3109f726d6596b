//! Platform capabilities
//!
//! Everything that differs between operating systems is decided once here,
//! so the supervisor loop only asks questions instead of checking `cfg!`.

use std::time::Duration;

/// How long to wait after the host exits before touching its files on Windows
const WINDOWS_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Capabilities of the platform the supervisor is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformTraits {
    /// Whether SIGUSR1 exists and should be relayed to the host
    pub user_signals: bool,
    /// Delay to let file handles of an exited host be released before an update swap
    pub post_exit_settle: Option<Duration>,
}

impl PlatformTraits {
    /// Capabilities of the current platform
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::posix()
        }
    }

    pub fn posix() -> Self {
        Self {
            user_signals: cfg!(unix),
            post_exit_settle: None,
        }
    }

    pub fn windows() -> Self {
        Self {
            user_signals: false,
            post_exit_settle: Some(WINDOWS_SETTLE_DELAY),
        }
    }
}

impl Default for PlatformTraits {
    fn default() -> Self {
        Self::current()
    }
}
