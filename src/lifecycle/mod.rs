//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (daemon.rs):
//!     Load settings → Load snapshot → Initial cycle → Start watcher
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger()
//!     SIGHUP → Re-read source file, reconcile
//!
//! Shutdown (shutdown.rs):
//!     Trigger → daemon loop exits after the cycle in progress
//! ```

pub mod daemon;
pub mod shutdown;
pub mod signals;

pub use daemon::Daemon;
pub use shutdown::Shutdown;
pub use signals::{Signal, Signals};
