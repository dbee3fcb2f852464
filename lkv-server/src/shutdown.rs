//! Stop flags for the server loops and OS signal handling.

use std::io;

use lkv_common::StopFlag;

/// Independent cancellation flags, set once during shutdown and never reset.
#[derive(Clone, Debug, Default)]
pub struct StopSignals {
    /// Listener loop.
    pub accept: StopFlag,
    /// Every connection worker.
    pub workers: StopFlag,
    /// Reaper task.
    pub reaper: StopFlag,
}

impl StopSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolves on SIGINT, SIGTERM or SIGHUP.
#[cfg(unix)]
pub async fn shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
        _ = hangup.recv() => Ok(()),
    }
}

/// Resolves on Ctrl-C.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
