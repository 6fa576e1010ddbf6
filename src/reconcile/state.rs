//! Reconciler state machine.
//!
//! # State Transitions
//! ```text
//! Idle → Validating → Diffing → Applying → Committed  → Idle
//!            │           │          └────→ RolledBack → Idle
//!            └───────────┴─ (invalid / empty plan) ───→ Idle
//! ```

use std::fmt;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Idle = 0,
    Validating = 1,
    Diffing = 2,
    Applying = 3,
    Committed = 4,
    RolledBack = 5,
}

impl From<u8> for ReconcileState {
    fn from(val: u8) -> Self {
        match val {
            1 => ReconcileState::Validating,
            2 => ReconcileState::Diffing,
            3 => ReconcileState::Applying,
            4 => ReconcileState::Committed,
            5 => ReconcileState::RolledBack,
            _ => ReconcileState::Idle,
        }
    }
}

impl ReconcileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileState::Idle => "idle",
            ReconcileState::Validating => "validating",
            ReconcileState::Diffing => "diffing",
            ReconcileState::Applying => "applying",
            ReconcileState::Committed => "committed",
            ReconcileState::RolledBack => "rolled-back",
        }
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
