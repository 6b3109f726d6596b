//! Host exit classification
//!
//! ```text
//!     ┌─────────┐
//!     │ Running │
//!     └────┬────┘
//!          │ exit code
//!   ┌──────┼──────────────┬──────────────┐
//!   │0     │1             │2             │other
//! ┌─▼──┐ ┌─▼─────────┐ ┌──▼──┐     ┌─────▼──────┐
//! │Done│ │ Restart   │ │Error│     │ OtherCrash │
//! └────┘ └─┬─────────┘ └─────┘     └────────────┘
//!          │ apply staged update
//!     ┌────▼────┐
//!     │ Running │ (next invocation)
//!     └─────────┘
//! ```
//!
//! The codes are the contract with the host; anything unknown is a crash.

/// Exit codes the host uses to talk to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HostExitCode {
    /// Clean stop, do not restart
    CompleteExecution = 0,
    /// Restart, with an optional update staged at the update path
    RestartRequested = 1,
    /// Fatal error, diagnostics written to the update path as a file
    Error = 2,
}

impl HostExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    CompleteExecution,
    RestartRequested,
    Error,
    /// Unrecognized exit code, including death by signal
    OtherCrash(i32),
}

impl ExitOutcome {
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c == HostExitCode::CompleteExecution.code() => Self::CompleteExecution,
            c if c == HostExitCode::RestartRequested.code() => Self::RestartRequested,
            c if c == HostExitCode::Error.code() => Self::Error,
            other => Self::OtherCrash(other),
        }
    }
}

/// Circumstances of the invocation that ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitContext {
    /// Only a configuration pass was requested
    pub configure_only: bool,
    /// Supervisor shutdown was requested
    pub cancelled: bool,
    /// The supervisor had to kill the host
    pub killed: bool,
}

/// What the loop does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Stop successfully
    Stop,
    /// Apply any staged update and launch again
    Restart,
    /// Apply any staged update, then stop because shutdown is in progress
    UpdateThenStop,
    /// Fail with the diagnostics the host left at the update path
    PropagateError,
    /// Host was killed during shutdown, stop quietly
    Cancelled,
    /// Fail with a crash error
    Crashed(i32),
}

impl Decision {
    /// Whether a staged update is applied before acting on the decision
    pub fn applies_update(self) -> bool {
        matches!(self, Self::Restart | Self::UpdateThenStop)
    }
}

/// Decide the next step for an invocation's outcome
pub fn decide(outcome: ExitOutcome, ctx: ExitContext) -> Decision {
    if ctx.configure_only {
        return Decision::Stop;
    }

    match outcome {
        ExitOutcome::CompleteExecution => Decision::Stop,
        ExitOutcome::RestartRequested if ctx.cancelled => Decision::UpdateThenStop,
        ExitOutcome::RestartRequested => Decision::Restart,
        ExitOutcome::Error => Decision::PropagateError,
        ExitOutcome::OtherCrash(_) if ctx.killed && ctx.cancelled => Decision::Cancelled,
        ExitOutcome::OtherCrash(code) => Decision::Crashed(code),
    }
}
