//! Host supervisor loop
//!
//! Launches the host, waits for it to exit, decides what its exit code
//! means, applies any update it staged, and launches it again.
//!
//! Shutdown is two-phase: on cancellation the invocation's update path is
//! claimed with an empty sentinel file the host can see, then the host is
//! killed if it has not exited after the grace period.

mod exit;
mod invocation;
mod process;
mod relay;
mod update;

pub use exit::{decide, Decision, ExitContext, ExitOutcome, HostExitCode};
pub use invocation::Invocation;
pub use process::{exit_code, HostProcess, LaunchError};
pub use relay::SignalRelay;
pub use update::{unique_sibling, PayloadFs, StdFs, UpdateApplier, UpdateError, UpdateOutcome};

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::layout::{Layout, LayoutError};
use crate::platform::PlatformTraits;

/// Time the host gets to exit on its own after shutdown is requested
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Asks the host to wait for a debugger
pub const ATTACH_DEBUGGER_ARG: &str = "--attach-debugger";

/// Asks the host to run its configuration check and wizard, then exit
pub const CONFIGURE_ONLY_ARG: &str = "General:SetupWizardMode=Only";

/// Everything the supervisor loop needs, passed in explicitly
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Runtime executable that runs the host entry point
    pub runtime: PathBuf,
    pub layout: Layout,
    /// Supervisor version, handed to the host
    pub version: String,
    /// Forwarded verbatim to every host invocation
    pub host_args: Vec<OsString>,
    /// Run one configuration pass and stop
    pub configure_only: bool,
    pub attach_debugger: bool,
    pub grace_period: Duration,
    pub platform: PlatformTraits,
}

impl SupervisorConfig {
    pub fn new(runtime: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            runtime: runtime.into(),
            layout,
            version: env!("CARGO_PKG_VERSION").to_string(),
            host_args: Vec::new(),
            configure_only: false,
            attach_debugger: false,
            grace_period: DEFAULT_GRACE_PERIOD,
            platform: PlatformTraits::current(),
        }
    }
}

/// How a single host process ended
#[derive(Debug, Clone, Copy)]
struct HostExit {
    code: i32,
    killed: bool,
}

pub struct Supervisor {
    config: SupervisorConfig,
    applier: UpdateApplier,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let applier = UpdateApplier::new(&config.platform);
        Self { config, applier }
    }

    /// Run the host until it stops, fails, or `cancel` fires
    ///
    /// Cancellation is a clean stop and returns `Ok(())`.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), SupervisorError> {
        log::info!("Host supervisor starting");
        log::debug!("PID: {}", std::process::id());

        let result = self.supervise(cancel).await;
        if let Err(e) = &result {
            log::error!("Host supervisor error: {}", e);
        }

        log::info!("Host supervisor exiting");
        result
    }

    async fn supervise(&self, cancel: &CancellationToken) -> Result<(), SupervisorError> {
        self.config.layout.validate()?;

        let mut signals = self.signal_relay();
        let storage = self.config.layout.storage_dir();
        let payload = self.config.layout.payload_dir();
        let mut count = 0;

        while !cancel.is_cancelled() {
            count += 1;
            let invocation = Invocation::new(count, &storage);
            log::info!(
                "Host invocation {}: update path set to {}",
                count,
                invocation.update_path().display()
            );

            let exit = self.run_host(&invocation, &mut signals, cancel).await?;

            let ctx = ExitContext {
                configure_only: self.config.configure_only,
                cancelled: cancel.is_cancelled(),
                killed: exit.killed,
            };
            if ctx.configure_only {
                log::info!("Exiting due to configuration check");
            }

            let decision = decide(ExitOutcome::from_code(exit.code), ctx);
            match decision {
                Decision::Stop => return self.stop(&invocation, cancel, Ok(())),
                Decision::Restart => log::info!("Supervisor will restart host"),
                Decision::UpdateThenStop => {
                    log::warn!("Host requested restart but supervisor shutdown is in progress")
                }
                Decision::PropagateError => {
                    log::error!("Host reported a fatal error, propagating diagnostics");
                    let diagnostics = invocation.take_diagnostics();
                    return Err(SupervisorError::HostError(diagnostics));
                }
                Decision::Cancelled => {
                    log::warn!("Supervisor was forced to kill the host");
                    return self.stop(&invocation, cancel, Ok(()));
                }
                Decision::Crashed(code) => {
                    if exit.killed {
                        log::warn!("Supervisor was forced to kill the host");
                    }
                    return self.stop(&invocation, cancel, Err(SupervisorError::Crashed { code }));
                }
            }

            if decision.applies_update() {
                match self.applier.apply(invocation.update_path(), &payload, cancel).await {
                    Ok(outcome) => log::debug!("Update check finished: {:?}", outcome),
                    Err(UpdateError::Cancelled) => {
                        log::debug!("Exiting due to cancellation");
                        return self.stop(&invocation, cancel, Ok(()));
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if decision == Decision::UpdateThenStop {
                return self.stop(&invocation, cancel, Ok(()));
            }
        }

        Ok(())
    }

    /// Leave the loop, cleaning up the update path if shutting down
    fn stop(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        result: Result<(), SupervisorError>,
    ) -> Result<(), SupervisorError> {
        if cancel.is_cancelled() {
            invocation.discard();
        }
        result
    }

    /// Launch one host process and wait for it to exit
    ///
    /// SIGUSR1 is relayed to the host the whole time. The host process is
    /// dropped before returning so no handle to the payload outlives it.
    async fn run_host(
        &self,
        invocation: &Invocation,
        signals: &mut Option<SignalRelay>,
        cancel: &CancellationToken,
    ) -> Result<HostExit, SupervisorError> {
        let args = self.host_arguments(invocation);

        log::info!("Launching host");
        let mut host =
            HostProcess::launch(&self.config.runtime, self.config.layout.root(), &args)?;
        let pid = host.pid();
        log::debug!("Host PID: {}", pid);

        let mut kill_at: Option<Instant> = None;
        let mut kill_sent = false;
        let mut killed = false;

        let code = loop {
            tokio::select! {
                result = host.wait() => break result?,
                _ = cancel.cancelled(), if kill_at.is_none() => {
                    invocation.claim_for_shutdown();
                    log::info!(
                        "Will force close host process if it doesn't exit in {:?}",
                        self.config.grace_period
                    );
                    kill_at = Some(Instant::now() + self.config.grace_period);
                }
                _ = grace_elapsed(kill_at), if kill_at.is_some() && !kill_sent => {
                    log::warn!("Host PID {} did not exit in time, killing it", pid);
                    kill_sent = true;
                    killed = host.terminate();
                }
                _ = relay::relay_next(signals, pid) => {}
            }
        };

        drop(host);
        log::info!("Host exited with code {}", code);
        Ok(HostExit { code, killed })
    }

    /// Arguments for one host invocation
    ///
    /// The host entry point, update path and supervisor version always come
    /// first, in that order.
    fn host_arguments(&self, invocation: &Invocation) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.config.layout.host_entry_path().into(),
            invocation.update_path().into(),
            self.config.version.clone().into(),
        ];

        if self.config.attach_debugger {
            args.push(ATTACH_DEBUGGER_ARG.into());
        }

        if self.config.configure_only && invocation.number() == 1 {
            log::info!("Running configuration check and wizard if necessary");
            args.push(CONFIGURE_ONLY_ARG.into());
        }

        args.extend(self.config.host_args.iter().cloned());
        args
    }

    fn signal_relay(&self) -> Option<SignalRelay> {
        if !self.config.platform.user_signals {
            return None;
        }

        match SignalRelay::new() {
            Ok(relay) => Some(relay),
            Err(e) => {
                log::warn!("SIGUSR1 will not be relayed to the host: {}", e);
                None
            }
        }
    }
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Unable to locate runtime executable {0} in PATH")]
    RuntimeNotFound(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("Host propagated error: {0}")]
    HostError(String),

    #[error("Host crashed with exit code {code}")]
    Crashed { code: i32 },
}
