//! Diff engine: compares the applied snapshot with a desired configuration
//! and produces an ordered, risk-classified plan.

pub mod engine;
pub mod operation;
pub mod snapshot;

pub use engine::{diff, Plan};
pub use operation::{Change, Operation, RiskLevel, StaleOperation};
pub use snapshot::{AppliedSnapshot, AppliedState, SnapshotError};
