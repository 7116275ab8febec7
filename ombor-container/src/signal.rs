//! Process termination signals.

use std::future::pending;

/// Listens for the signals that ask the process to stop.
///
/// SIGINT and SIGTERM on Unix, Ctrl-C elsewhere. Must be registered from
/// inside a Tokio runtime.
#[derive(Debug)]
pub struct TerminationSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl TerminationSignal {
    /// Installs the handlers.
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Installs the handlers.
    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Resolves with the signal name once one is delivered.
    ///
    /// Never resolves if the signal streams close without delivering.
    #[cfg(unix)]
    pub async fn wait(mut self) -> &'static str {
        tokio::select! {
            Some(()) = self.interrupt.recv() => "SIGINT",
            Some(()) = self.terminate.recv() => "SIGTERM",
            else => pending().await,
        }
    }

    /// Resolves with the signal name once one is delivered.
    #[cfg(not(unix))]
    pub async fn wait(self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(_) => pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_inside_runtime() {
        assert!(TerminationSignal::register().is_ok());
    }
}
