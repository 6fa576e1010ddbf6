//! Reverse proxy control.
//!
//! # Data Flow
//! ```text
//! AppliedState (working copy)
//!     → nginx.rs render_state() → RenderedConfig (one site file per service)
//!     → ProxyControl::install()
//!     → ProxyControl::reload() | ProxyControl::restart()   (per risk level)
//! ```
//!
//! The reconciler is generic over [`ProxyControl`] so tests can substitute a
//! recording double for [`NginxControl`].

pub mod command;
pub mod nginx;

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

pub use command::NginxControl;
pub use nginx::{render_state, RenderedConfig, SiteFile};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to install {path}: {source}")]
    InstallFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reload failed: {reason}")]
    ReloadFailed { reason: String },

    #[error("restart failed: {reason}")]
    RestartFailed { reason: String },
}

/// The running reverse proxy.
///
/// The reconciler drops a call's future when it times out. An
/// implementation must not abort work it has already handed to the proxy;
/// it lets that work finish before the next call takes effect.
pub trait ProxyControl: Send + Sync {
    /// Make `rendered` the configuration the next reload/restart picks up.
    fn install(
        &self,
        rendered: &RenderedConfig,
    ) -> impl Future<Output = Result<(), ControlError>> + Send;

    /// Reload without dropping listening sockets.
    fn reload(&self) -> impl Future<Output = Result<(), ControlError>> + Send;

    /// Full restart; required when listeners change.
    fn restart(&self) -> impl Future<Output = Result<(), ControlError>> + Send;
}
