//! Process signal wiring for the binary.

use anyhow::Context;
use nix::sys::signal::{SigHandler, Signal, signal};
use tracing::info;

use crate::server::shutdown::ShutdownHandle;

/// Lets the kernel reap exited worker processes.
pub fn ignore_child_exits() -> anyhow::Result<()> {
    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal(Signal::SIGCHLD, SigHandler::SigIgn) }.context("failed to ignore SIGCHLD")?;
    Ok(())
}

/// Resolves on the first Ctrl-C after requesting shutdown.
pub async fn shutdown_on_interrupt(shutdown: ShutdownHandle) -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for interrupt")?;
    info!("Shutdown signal received");
    shutdown.request();
    Ok(())
}
