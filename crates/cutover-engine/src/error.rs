use std::fmt;

use cutover_config::{ConfigError, Phase, TransitionKind};
use cutover_gate::GateStage;
use cutover_model::{PlanError, WorkloadState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::InventoryError;

/// A workload transition refused by the state machine guards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
  #[error("workload '{workload_id}' cannot {kind} from {from}")]
  IllegalEdge {
    workload_id: String,
    kind: TransitionKind,
    from: WorkloadState,
  },

  #[error("{} does not permit {kind} for workload '{workload_id}'", .phase.map_or("no active phase".to_string(), |p| format!("phase {p}")))]
  PhaseForbids {
    workload_id: String,
    phase: Option<Phase>,
    kind: TransitionKind,
  },

  #[error("workload '{workload_id}' waits on uncommitted predecessors: {}", .pending.join(", "))]
  PredecessorsPending {
    workload_id: String,
    pending: Vec<String>,
  },

  #[error("workload '{workload_id}' is excluded from its phase")]
  Excluded { workload_id: String },

  #[error("workload '{workload_id}' is not attached to its target")]
  NotOnTarget { workload_id: String },

  #[error("workload '{workload_id}' has no passing post-cutover validation for this attempt")]
  NotValidated { workload_id: String },

  #[error("committed workload '{workload_id}' cannot be rolled back once decommission has begun")]
  PastPointOfNoReturn { workload_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
  #[error("migration has not begun")]
  NotBegun,

  #[error("migration already begun; current phase is {current}")]
  AlreadyBegun { current: Phase },

  #[error("{current} is the final phase")]
  NoNextPhase { current: Phase },

  #[error("phase {requested} is not active (current: {})", .current.map_or("none".to_string(), |p| p.to_string()))]
  NotActive {
    requested: Phase,
    current: Option<Phase>,
  },

  #[error("cannot leave {current}: workloads neither committed nor excluded: {}", .pending.join(", "))]
  ScheduledPending { current: Phase, pending: Vec<String> },

  #[error("entry checks for {phase} failed: {}", .failing.join(", "))]
  EntryChecksFailed { phase: Phase, failing: Vec<String> },
}

/// Classification of orchestrator errors and issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  DependencyCycle,
  ValidationFailure,
  ProbeTimeout,
  AttachmentDriver,
  RollbackWindowExpired,
  /// An approved rollback stopped before every affected workload was back on its source.
  RollbackIncomplete,
  Persistence,
  Plan,
  Transition,
  Phase,
  Inventory,
  Config,
  NotFound,
  RunInProgress,
  Halted,
  /// A workload task ended without reporting, e.g. it panicked.
  Internal,
}

impl ErrorKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ErrorKind::DependencyCycle => "dependency_cycle",
      ErrorKind::ValidationFailure => "validation_failure",
      ErrorKind::ProbeTimeout => "probe_timeout",
      ErrorKind::AttachmentDriver => "attachment_driver",
      ErrorKind::RollbackWindowExpired => "rollback_window_expired",
      ErrorKind::RollbackIncomplete => "rollback_incomplete",
      ErrorKind::Persistence => "persistence",
      ErrorKind::Plan => "plan",
      ErrorKind::Transition => "transition",
      ErrorKind::Phase => "phase",
      ErrorKind::Inventory => "inventory",
      ErrorKind::Config => "config",
      ErrorKind::NotFound => "not_found",
      ErrorKind::RunInProgress => "run_in_progress",
      ErrorKind::Halted => "halted",
      ErrorKind::Internal => "internal",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Transition(#[from] TransitionError),

  #[error(transparent)]
  Phase(#[from] PhaseError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Inventory(#[from] InventoryError),

  /// The audit log refused a write. The orchestrator halts.
  #[error("persistence failure: {0}")]
  Persistence(#[from] cutover_store::Error),

  #[error("workload '{workload_id}' failed {stage} validation: {}", .failing.join(", "))]
  ValidationFailed {
    workload_id: String,
    stage: GateStage,
    failing: Vec<String>,
  },

  #[error("unknown workload: {0}")]
  UnknownWorkload(String),

  #[error("no batch {index} in the {phase} plan")]
  UnknownBatch { phase: Phase, index: usize },

  #[error("workload '{workload_id}' cannot be excluded while {state}")]
  NotExcludable {
    workload_id: String,
    state: WorkloadState,
  },

  #[error("a run or phase change is already in progress")]
  RunInProgress,

  #[error("orchestrator halted after a persistence failure")]
  Halted,
}

impl OrchestratorError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      OrchestratorError::Plan(PlanError::DependencyCycle(_)) => ErrorKind::DependencyCycle,
      OrchestratorError::Plan(_) => ErrorKind::Plan,
      OrchestratorError::Transition(_) => ErrorKind::Transition,
      OrchestratorError::Phase(_) => ErrorKind::Phase,
      OrchestratorError::Config(_) => ErrorKind::Config,
      OrchestratorError::Inventory(_) => ErrorKind::Inventory,
      OrchestratorError::Persistence(_) => ErrorKind::Persistence,
      OrchestratorError::ValidationFailed { .. } => ErrorKind::ValidationFailure,
      OrchestratorError::UnknownWorkload(_) | OrchestratorError::UnknownBatch { .. } => {
        ErrorKind::NotFound
      }
      OrchestratorError::NotExcludable { .. } => ErrorKind::Transition,
      OrchestratorError::RunInProgress => ErrorKind::RunInProgress,
      OrchestratorError::Halted => ErrorKind::Halted,
    }
  }

  /// Whether an operator has to intervene before orchestration can go on.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self.kind(),
      ErrorKind::DependencyCycle | ErrorKind::Persistence | ErrorKind::Halted
    )
  }
}

#[cfg(test)]
mod tests {
  use cutover_model::DependencyCycleError;

  use super::*;

  #[test]
  fn test_cycle_is_fatal() {
    let err = OrchestratorError::from(PlanError::from(DependencyCycleError {
      remaining: vec!["a".to_string(), "b".to_string()],
    }));
    assert_eq!(err.kind(), ErrorKind::DependencyCycle);
    assert!(err.is_fatal());
  }

  #[test]
  fn test_validation_failure_is_recoverable() {
    let err = OrchestratorError::ValidationFailed {
      workload_id: "web-1".to_string(),
      stage: GateStage::PostCutover,
      failing: vec!["gateway_reachable".to_string()],
    };
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert!(!err.is_fatal());
    assert_eq!(
      err.to_string(),
      "workload 'web-1' failed post_cutover validation: gateway_reachable"
    );
  }

  #[test]
  fn test_persistence_is_fatal() {
    let err = OrchestratorError::from(cutover_store::Error::Unavailable("disk full".to_string()));
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert!(err.is_fatal());
  }

  #[test]
  fn test_transition_error_messages() {
    let err = TransitionError::PhaseForbids {
      workload_id: "db-1".to_string(),
      phase: Some(Phase::Prep),
      kind: TransitionKind::Cutover,
    };
    assert_eq!(
      err.to_string(),
      "phase prep does not permit cutover for workload 'db-1'"
    );
  }
}
