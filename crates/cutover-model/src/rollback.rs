use std::fmt;

use chrono::{DateTime, Utc};
use cutover_config::{ActorClass, Phase, ScopeKind};
use serde::{Deserialize, Serialize};

use crate::workload::WorkloadId;

/// What a rollback request covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackScope {
  Single { workload_id: WorkloadId },
  Batch { phase: Phase, index: usize },
  Full,
}

impl RollbackScope {
  pub fn single(workload_id: impl Into<String>) -> Self {
    RollbackScope::Single {
      workload_id: workload_id.into(),
    }
  }

  pub fn kind(&self) -> ScopeKind {
    match self {
      RollbackScope::Single { .. } => ScopeKind::Single,
      RollbackScope::Batch { .. } => ScopeKind::Batch,
      RollbackScope::Full => ScopeKind::Full,
    }
  }
}

impl fmt::Display for RollbackScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RollbackScope::Single { workload_id } => write!(f, "workload {workload_id}"),
      RollbackScope::Batch { phase, index } => write!(f, "{phase} batch {index}"),
      RollbackScope::Full => f.write_str("full phase"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
  /// Requester holds the required authority; the rollback executes.
  Approved,
  /// The request can never be honoured in the current phase.
  Denied,
  /// Requester lacks authority; nothing moves until a higher class approves.
  Escalated,
}

impl fmt::Display for RollbackOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RollbackOutcome::Approved => f.write_str("approved"),
      RollbackOutcome::Denied => f.write_str("denied"),
      RollbackOutcome::Escalated => f.write_str("escalated"),
    }
  }
}

/// Audited result of a rollback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackDecision {
  pub decision_id: String,
  pub scope: RollbackScope,
  pub requested_by: ActorClass,
  /// Phase active when the request was decided.
  pub phase: Phase,
  /// Time spent in `phase` at decision time, in seconds.
  pub elapsed_secs: u64,
  pub required: ActorClass,
  pub window_expired: bool,
  /// Workloads rolled back, in execution order (dependents first).
  pub affected: Vec<WorkloadId>,
  pub outcome: RollbackOutcome,
  pub reason: String,
  pub decided_at: DateTime<Utc>,
}

impl RollbackDecision {
  pub fn is_approved(&self) -> bool {
    self.outcome == RollbackOutcome::Approved
  }
}
