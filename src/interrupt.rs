//! Interrupt handling for the forward flow.
//!
//! Once installed, the gate owns SIGINT and SIGTERM for the life of the
//! process: the default "exit immediately" behaviour never runs, so
//! teardown always gets its turn. Outside a pass-through window a signal
//! cancels the flow's token. While a data-plane child is running, signals are
//! observed and left to the child, which shares the terminal's process group.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shared cancellation state for one invocation.
#[derive(Clone, Debug, Default)]
pub struct InterruptGate {
    token: CancellationToken,
    passthrough: Arc<AtomicBool>,
}

/// While alive, signals are passed through to the foreground child.
#[derive(Debug)]
pub struct PassthroughGuard {
    passthrough: Arc<AtomicBool>,
}

impl Drop for PassthroughGuard {
    fn drop(&mut self) {
        self.passthrough.store(false, Ordering::SeqCst);
    }
}

impl InterruptGate {
    /// Creates a gate that has not been triggered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when an interrupt reaches the flow.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns `true` once the flow has been interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Delivers an interrupt. Returns `false` when it was passed through to a
    /// running child instead of cancelling the flow.
    pub fn trigger(&self) -> bool {
        if self.passthrough.load(Ordering::SeqCst) {
            debug!("interrupt passed through to data-plane process");
            return false;
        }
        if !self.token.is_cancelled() {
            warn!("interrupt received; cleaning up before exit");
        }
        self.token.cancel();
        true
    }

    /// Opens a pass-through window that lasts until the guard is dropped.
    #[must_use]
    pub fn passthrough(&self) -> PassthroughGuard {
        self.passthrough.store(true, Ordering::SeqCst);
        PassthroughGuard {
            passthrough: Arc::clone(&self.passthrough),
        }
    }

    /// Runs `future` unless the gate fires first. Returns `None` when
    /// interrupted; the future is dropped at its current await point, so
    /// only steps that create nothing remote belong here.
    pub async fn run<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            output = future => Some(output),
        }
    }

    /// Installs the process signal listener.
    ///
    /// # Errors
    ///
    /// Returns the OS error when a signal handler cannot be registered.
    pub fn install(&self) -> io::Result<JoinHandle<()>> {
        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let gate = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                #[cfg(unix)]
                let received = tokio::select! {
                    result = tokio::signal::ctrl_c() => result.is_ok(),
                    signal = terminate.recv() => signal.is_some(),
                };
                #[cfg(not(unix))]
                let received = tokio::signal::ctrl_c().await.is_ok();

                if !received {
                    break;
                }
                gate.trigger();
            }
        }))
    }
}
