//! Reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! desired ServiceConfig
//!     → Validating  (certificate reads on a blocking thread, under timeout)
//!     → Diffing     (plan against the published snapshot)
//!     → Applying    (per operation: install rendering, reload or restart)
//!     → Committed   (snapshot version+1, persisted, published)
//!     ↘ RolledBack  (restore, revert applied operations in reverse)
//! ```
//!
//! At most one cycle runs; one more may wait for it. Anything beyond that
//! is rejected with `Busy`.

pub mod error;
pub mod reconciler;
pub mod state;

pub use error::{ApplyFailure, FailedOperation, ReconcileError, RollbackFailure, StepError};
pub use reconciler::{ReconcileReport, Reconciler};
pub use state::ReconcileState;
