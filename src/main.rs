//! hostvisor - Host process supervisor
//!
//! Locates the runtime, validates the installation, then keeps the host
//! running until it stops on its own or the supervisor is told to shut down.
//!
//! Exit code 0 on a clean stop, 1 on any fatal error.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use hostvisor::layout::{Layout, DEFAULT_HOST_ENTRY};
use hostvisor::supervisor::DEFAULT_GRACE_PERIOD;
use hostvisor::{locator, shutdown, Supervisor, SupervisorConfig, SupervisorError};

#[derive(Parser)]
#[command(name = "hostvisor")]
#[command(about = "Keeps the host process running and applies its self-updates")]
#[command(version)]
struct Args {
    /// Run the host's configuration check once, then exit
    #[arg(long)]
    configure: bool,

    /// Have the host wait for a debugger to attach
    #[arg(long)]
    attach_host_debugger: bool,

    /// Installation root (defaults to the directory of this executable)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Runtime used to run the host entry point, name or path
    #[arg(long, default_value = "dotnet")]
    runtime: String,

    /// Host entry point file inside the installed payload
    #[arg(long, default_value = DEFAULT_HOST_ENTRY)]
    host_entry: String,

    /// Replace the installed payload with this development build before starting
    #[arg(long)]
    dev_payload: Option<PathBuf>,

    /// Seconds the host gets to exit after shutdown is requested
    #[arg(long, default_value_t = DEFAULT_GRACE_PERIOD.as_secs())]
    grace_period: u64,

    /// Arguments passed through to every host invocation
    #[arg(last = true, allow_hyphen_values = true)]
    host_args: Vec<OsString>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let cancel = CancellationToken::new();
    shutdown::cancel_on_shutdown_signal(cancel.clone());

    let supervisor = build_supervisor(args).inspect_err(|e| log::error!("{}", e))?;

    // Logged by the supervisor, returned for the non-zero exit code
    supervisor.run(&cancel).await?;

    Ok(())
}

/// Resolve the runtime and installation from the command line
fn build_supervisor(args: Args) -> Result<Supervisor, SupervisorError> {
    let runtime = locator::find_runtime(&args.runtime)
        .ok_or_else(|| SupervisorError::RuntimeNotFound(args.runtime.clone()))?;
    log::info!("Detected runtime executable at {}", runtime.display());

    let mut layout = match args.root {
        Some(root) => Layout::new(root, args.host_entry),
        None => Layout::beside_executable(args.host_entry)?,
    };
    layout.prepare()?;
    if let Some(source) = &args.dev_payload {
        layout.bootstrap_dev_payload(source)?;
    }
    layout.validate()?;

    let mut config = SupervisorConfig::new(runtime, layout);
    config.host_args = args.host_args;
    config.configure_only = args.configure;
    config.attach_debugger = args.attach_host_debugger;
    config.grace_period = Duration::from_secs(args.grace_period);

    Ok(Supervisor::new(config))
}
