//! SIGUSR1 relay
//!
//! Operators signal the supervisor, since it owns the terminal session, but
//! SIGUSR1 is meant for the host. The relay catches it on the supervisor and
//! sends it on to the current host PID.
//!
//! Windows has no equivalent signal, so the relay does not exist there.

#[cfg(unix)]
mod imp {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;
    use tokio::signal::unix::{signal, Signal, SignalKind};

    /// Catches SIGUSR1 for the lifetime of the supervisor
    pub struct SignalRelay {
        sigusr1: Signal,
    }

    impl SignalRelay {
        /// Install the SIGUSR1 handler
        ///
        /// Must happen before the first host is launched; without a handler
        /// SIGUSR1 terminates the supervisor.
        pub fn new() -> std::io::Result<Self> {
            Ok(Self {
                sigusr1: signal(SignalKind::user_defined1())?,
            })
        }

        /// Wait for the next SIGUSR1 and forward it to `pid`
        ///
        /// A signal that arrived while no host was running is delivered to
        /// the next host. Cancel safe.
        pub async fn relay_next(&mut self, pid: u32) {
            if self.sigusr1.recv().await.is_none() {
                // The signal driver is gone, stop relaying for good
                std::future::pending::<()>().await;
            }

            log::info!("Received SIGUSR1, forwarding to host PID {}", pid);
            if let Err(e) = forward(pid) {
                log::warn!("Failed to forward SIGUSR1 to PID {}: {}", pid, e);
            }
        }
    }

    fn forward(pid: u32) -> nix::Result<()> {
        let pid = i32::try_from(pid).map_err(|_| nix::errno::Errno::ESRCH)?;
        kill(Pid::from_raw(pid), NixSignal::SIGUSR1)
    }
}

#[cfg(not(unix))]
mod imp {
    /// No user signals on this platform
    pub struct SignalRelay {
        _private: (),
    }

    impl SignalRelay {
        pub fn new() -> std::io::Result<Self> {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "user signals are not supported on this platform",
            ))
        }

        pub async fn relay_next(&mut self, _pid: u32) {
            std::future::pending::<()>().await
        }
    }
}

pub use imp::SignalRelay;

/// Relay the next signal, or never complete when there is no relay
pub(super) async fn relay_next(relay: &mut Option<SignalRelay>, pid: u32) {
    match relay {
        Some(relay) => relay.relay_next(pid).await,
        None => std::future::pending().await,
    }
}
