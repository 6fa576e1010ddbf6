//! OS signal handling.
//!
//! - SIGINT / SIGTERM → shutdown
//! - SIGHUP → reconcile from the source file, not shutdown

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::lifecycle::shutdown::Shutdown;

/// What a received signal asks the daemon to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Reconcile,
}

/// Registered signal streams.
pub struct Signals {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    pub fn install() -> io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                hangup: signal(SignalKind::hangup())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.hangup.recv() => {
                tracing::info!("SIGHUP received");
                Signal::Reconcile
            }
            _ = self.terminate.recv() => {
                tracing::info!("SIGTERM received");
                Signal::Shutdown
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                Signal::Shutdown
            }
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Signal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Unable to listen for Ctrl-C");
        }
        tracing::info!("Shutdown signal received");
        Signal::Shutdown
    }

    /// Translate signals until shutdown: reconcile requests go to
    /// `requests`, shutdown signals trigger `shutdown`.
    pub async fn forward(mut self, shutdown: Arc<Shutdown>, requests: mpsc::Sender<()>) {
        let mut stopped = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = stopped.recv() => break,
                signal = self.recv() => match signal {
                    Signal::Shutdown => {
                        shutdown.trigger();
                        break;
                    }
                    Signal::Reconcile => {
                        // A full queue already holds a pending request.
                        let _ = requests.try_send(());
                    }
                },
            }
        }
    }
}
