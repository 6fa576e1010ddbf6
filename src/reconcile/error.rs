//! Reconciliation errors.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::diff::{Operation, SnapshotError, StaleOperation};
use crate::proxy::ControlError;

/// Why a single step of a cycle (forward or rollback) failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("{action} did not finish within {timeout:?}")]
    Timeout {
        action: &'static str,
        timeout: Duration,
    },

    #[error(transparent)]
    Stale(#[from] StaleOperation),

    #[error("refusing to install colliding listeners: {0}")]
    Conflict(ValidationError),

    #[error("failed to persist snapshot: {0}")]
    Persist(#[from] SnapshotError),
}

impl StepError {
    /// Whether the proxy may have seen the step before it failed.
    pub fn reached_proxy(&self) -> bool {
        matches!(self, StepError::Control(_) | StepError::Timeout { .. })
    }
}

/// The plan operation that triggered a rollback.
#[derive(Debug, Clone)]
pub struct FailedOperation {
    /// Position in the plan, zero-based.
    pub index: usize,
    pub operation: Operation,
}

#[derive(Debug)]
pub struct RollbackFailure {
    pub operation: Operation,
    pub cause: StepError,
}

/// A failed Applying phase: the trigger, what was undone, and anything that
/// could not be undone.
#[derive(Debug)]
pub struct ApplyFailure {
    /// `None` when every operation succeeded but committing failed.
    pub failed: Option<FailedOperation>,
    pub cause: StepError,
    /// Reverted operations, in the order they were reverted.
    pub rolled_back: Vec<Operation>,
    pub rollback_failures: Vec<RollbackFailure>,
}

impl ApplyFailure {
    /// Whether the proxy is back on the previously applied configuration.
    pub fn is_clean(&self) -> bool {
        self.rollback_failures.is_empty()
    }
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failed {
            Some(failed) => write!(
                f,
                "operation #{} ({}) failed: {}",
                failed.index + 1,
                failed.operation,
                self.cause
            )?,
            None => write!(f, "commit failed: {}", self.cause)?,
        }
        write!(f, "; rolled back {} operation(s)", self.rolled_back.len())?;
        for failure in &self.rollback_failures {
            write!(f, "; rollback of {} failed: {}", failure.operation, failure.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApplyFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("a reconciliation is already running and another is queued")]
    Busy,

    #[error("configuration is invalid ({} error(s))", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("{stage} did not finish within {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    #[error(transparent)]
    Apply(#[from] ApplyFailure),

    #[error("validation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ReconcileError {
    /// Label used for the cycle outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            ReconcileError::Busy => "busy",
            ReconcileError::Validation(_) => "invalid",
            ReconcileError::Timeout { .. } | ReconcileError::Join(_) => "failed",
            ReconcileError::Apply(_) => "rolled_back",
        }
    }

    /// Whether retrying the same input later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Validation(_) => false,
            // The same plan would hit the same collision.
            ReconcileError::Apply(failure) => !matches!(failure.cause, StepError::Conflict(_)),
            _ => true,
        }
    }
}
