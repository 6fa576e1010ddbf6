//! The reconciliation cycle.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::model::ServiceConfig;
use crate::config::validation::{listener_conflicts, validate_config};
use crate::diff::{diff, AppliedSnapshot, AppliedState, Operation, Plan, RiskLevel};
use crate::observability::metrics;
use crate::proxy::{render_state, ControlError, ProxyControl};
use crate::reconcile::error::{
    ApplyFailure, FailedOperation, ReconcileError, RollbackFailure, StepError,
};
use crate::reconcile::state::ReconcileState;

/// One cycle in flight plus one waiting.
const MAX_PENDING_CYCLES: usize = 2;

/// Outcome of a committed cycle.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub cycle_id: Uuid,
    /// Version of the snapshot published by this cycle.
    pub version: u64,
    /// Operations applied, in order. Empty when nothing changed.
    pub applied: Vec<Operation>,
}

/// Drives the proxy from its applied snapshot to a desired configuration.
pub struct Reconciler<C> {
    control: C,
    snapshot: ArcSwap<AppliedSnapshot>,
    state: AtomicU8,
    pending: Semaphore,
    cycle: Mutex<()>,
    timeout: Duration,
    state_path: Option<PathBuf>,
}

impl<C: ProxyControl> Reconciler<C> {
    pub fn new(control: C, snapshot: AppliedSnapshot, timeout: Duration) -> Self {
        Self {
            control,
            snapshot: ArcSwap::from_pointee(snapshot),
            state: AtomicU8::new(ReconcileState::Idle as u8),
            pending: Semaphore::new(MAX_PENDING_CYCLES),
            cycle: Mutex::new(()),
            timeout,
            state_path: None,
        }
    }

    /// Persist every committed snapshot to `path`.
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn state(&self) -> ReconcileState {
        ReconcileState::from(self.state.load(Ordering::Acquire))
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<AppliedSnapshot> {
        self.snapshot.load_full()
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// The plan a cycle would apply right now, without applying it.
    pub fn plan(&self, desired: &ServiceConfig) -> Plan {
        diff(&self.snapshot.load(), desired)
    }

    /// Run one reconciliation cycle towards `desired`.
    ///
    /// Returns [`ReconcileError::Busy`] immediately when a cycle is running
    /// and another is already waiting.
    pub async fn reconcile(&self, desired: ServiceConfig) -> Result<ReconcileReport, ReconcileError> {
        let Ok(_pending) = self.pending.try_acquire() else {
            tracing::warn!("Reconciliation rejected, queue is full");
            metrics::record_cycle("busy");
            return Err(ReconcileError::Busy);
        };
        let _cycle = self.cycle.lock().await;

        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("reconcile", cycle = %cycle_id);
        let result = self.run_cycle(cycle_id, desired).instrument(span).await;

        match &result {
            Ok(_) => metrics::record_cycle("committed"),
            Err(e) => metrics::record_cycle(e.outcome()),
        }
        result
    }

    async fn run_cycle(
        &self,
        cycle_id: Uuid,
        desired: ServiceConfig,
    ) -> Result<ReconcileReport, ReconcileError> {
        self.set_state(ReconcileState::Validating);
        if let Err(e) = self.validate(&desired).await {
            tracing::warn!(error = %e, "Desired configuration rejected");
            self.set_state(ReconcileState::Idle);
            return Err(e);
        }

        self.set_state(ReconcileState::Diffing);
        let current = self.snapshot.load_full();
        let plan = diff(&current, &desired);
        if plan.is_empty() {
            tracing::info!(version = current.version, "Already up to date");
            self.set_state(ReconcileState::Committed);
            self.set_state(ReconcileState::Idle);
            return Ok(ReconcileReport {
                cycle_id,
                version: current.version,
                applied: Vec::new(),
            });
        }
        tracing::info!(
            base_version = plan.base_version,
            operations = plan.len(),
            "Applying plan"
        );

        self.set_state(ReconcileState::Applying);
        let mut working = current.state.clone();
        let mut applied: Vec<Operation> = Vec::with_capacity(plan.len());

        for (index, operation) in plan.operations.iter().enumerate() {
            let before = working.clone();
            match self.execute(operation, &mut working).await {
                Ok(()) => {
                    tracing::info!(step = index + 1, %operation, "Operation applied");
                    applied.push(operation.clone());
                }
                Err(cause) => {
                    tracing::error!(step = index + 1, %operation, error = %cause, "Operation failed");
                    let failed = FailedOperation {
                        index,
                        operation: operation.clone(),
                    };
                    let failure = self.roll_back(Some(failed), cause, before, &applied).await;
                    return Err(failure.into());
                }
            }
        }

        let next = current.advance(&desired);
        if let Some(path) = &self.state_path {
            if let Err(e) = next.persist(path).await {
                tracing::error!(error = %e, path = %path.display(), "Snapshot persistence failed");
                let failure = self
                    .roll_back(None, StepError::Persist(e), working, &applied)
                    .await;
                return Err(failure.into());
            }
        }

        let version = next.version;
        self.snapshot.store(Arc::new(next));
        self.set_state(ReconcileState::Committed);
        for operation in &applied {
            metrics::record_operation(operation.risk);
        }
        metrics::record_applied_version(version);
        tracing::info!(version, operations = applied.len(), "Snapshot committed");
        self.set_state(ReconcileState::Idle);

        Ok(ReconcileReport {
            cycle_id,
            version,
            applied,
        })
    }

    async fn validate(&self, desired: &ServiceConfig) -> Result<(), ReconcileError> {
        let candidate = desired.clone();
        let task = tokio::task::spawn_blocking(move || validate_config(&candidate));
        match timeout(self.timeout, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(errors))) => Err(ReconcileError::Validation(errors)),
            Ok(Err(join)) => Err(ReconcileError::Join(join)),
            Err(_) => Err(ReconcileError::Timeout {
                stage: "validation",
                timeout: self.timeout,
            }),
        }
    }

    /// Apply `operation` to `working`, install the rendering and make the
    /// proxy pick it up. A state with colliding listeners is never installed.
    async fn execute(
        &self,
        operation: &Operation,
        working: &mut AppliedState,
    ) -> Result<(), StepError> {
        operation.apply_to(working)?;
        check_listeners(working)?;
        self.install(working, operation.risk).await
    }

    async fn install(&self, state: &AppliedState, risk: RiskLevel) -> Result<(), StepError> {
        let rendered = render_state(state);
        self.guarded("install", self.control.install(&rendered)).await?;
        self.activate(risk).await
    }

    async fn activate(&self, risk: RiskLevel) -> Result<(), StepError> {
        match risk {
            RiskLevel::SafeReload => self.guarded("reload", self.control.reload()).await,
            RiskLevel::RequiresRestart => self.guarded("restart", self.control.restart()).await,
        }
    }

    async fn guarded<F>(&self, action: &'static str, call: F) -> Result<(), StepError>
    where
        F: Future<Output = Result<(), ControlError>>,
    {
        match timeout(self.timeout, call).await {
            Ok(result) => result.map_err(StepError::Control),
            Err(_) => Err(StepError::Timeout {
                action,
                timeout: self.timeout,
            }),
        }
    }

    /// Put the proxy back on `restore` (the state before the failing
    /// operation) if the failure reached it, then revert `applied` in
    /// reverse order.
    async fn roll_back(
        &self,
        failed: Option<FailedOperation>,
        cause: StepError,
        restore: AppliedState,
        applied: &[Operation],
    ) -> ApplyFailure {
        let mut working = restore;
        let mut rolled_back = Vec::with_capacity(applied.len());
        let mut rollback_failures = Vec::new();

        if let Some(failed) = failed.as_ref().filter(|_| cause.reached_proxy()) {
            if let Err(e) = self.install(&working, failed.operation.risk).await {
                tracing::error!(operation = %failed.operation, error = %e, "Restoring failed operation did not succeed");
                rollback_failures.push(RollbackFailure {
                    operation: failed.operation.clone(),
                    cause: e,
                });
            }
        }

        for operation in applied.iter().rev() {
            // Reverting heads back to states that were already live, so the
            // listener check is skipped.
            let inverse = operation.inverse();
            let reverted = match inverse.apply_to(&mut working) {
                Ok(()) => self.install(&working, inverse.risk).await,
                Err(e) => Err(e.into()),
            };
            match reverted {
                Ok(()) => {
                    tracing::info!(%operation, "Operation rolled back");
                    rolled_back.push(operation.clone());
                }
                Err(e) => {
                    tracing::error!(%operation, error = %e, "Rollback step failed");
                    rollback_failures.push(RollbackFailure {
                        operation: operation.clone(),
                        cause: e,
                    });
                }
            }
        }

        metrics::record_rollback();
        self.set_state(ReconcileState::RolledBack);
        tracing::warn!(
            rolled_back = rolled_back.len(),
            rollback_failures = rollback_failures.len(),
            "Cycle rolled back, snapshot unchanged"
        );
        self.set_state(ReconcileState::Idle);

        ApplyFailure {
            failed,
            cause,
            rolled_back,
            rollback_failures,
        }
    }

    fn set_state(&self, state: ReconcileState) {
        let previous = ReconcileState::from(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "State transition");
        }
    }
}

fn check_listeners(state: &AppliedState) -> Result<(), StepError> {
    if let (Some(git), Some(registry)) = (&state.git, &state.registry) {
        if let Some(conflict) = listener_conflicts(git, registry).into_iter().next() {
            return Err(StepError::Conflict(conflict));
        }
    }
    Ok(())
}
