use chrono::{DateTime, Utc};
use cutover_config::{Phase, TransitionKind};
use cutover_gate::GateResult;
use cutover_model::{AttachmentSide, Direction, Plan, RollbackDecision, Workload, WorkloadState};
use serde::{Deserialize, Serialize};

/// What an event records. Transitions carry both the prior and the new state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
  WorkloadRegistered {
    workload: Workload,
  },
  WorkloadTransition {
    kind: TransitionKind,
    from: WorkloadState,
    to: WorkloadState,
  },
  TransitionRejected {
    kind: TransitionKind,
    from: WorkloadState,
    reason: String,
  },
  /// Written immediately before the attachment driver is called.
  SwitchRequested {
    direction: Direction,
  },
  SwitchCompleted {
    direction: Direction,
    diagnostic: serde_json::Value,
  },
  /// The driver errored or timed out; where the workload is attached is unknown.
  SwitchFailed {
    direction: Direction,
    error: String,
  },
  Reconciled {
    side: AttachmentSide,
    result: GateResult,
  },
  GateRecorded {
    result: GateResult,
  },
  WorkloadExcluded {
    reason: String,
  },
  /// Nothing moves for this workload until an operator requests a rollback.
  AwaitingDecision {
    reason: String,
  },
  IssueRaised {
    kind: String,
    message: String,
  },
  PlanRecorded {
    plan: Plan,
  },
  PhaseEntered {
    from: Option<Phase>,
    to: Phase,
  },
  PhaseRejected {
    from: Option<Phase>,
    to: Phase,
    reason: String,
  },
  RollbackDecided {
    decision: RollbackDecision,
  },
}

impl Change {
  pub fn name(&self) -> &'static str {
    match self {
      Change::WorkloadRegistered { .. } => "workload_registered",
      Change::WorkloadTransition { .. } => "workload_transition",
      Change::TransitionRejected { .. } => "transition_rejected",
      Change::SwitchRequested { .. } => "switch_requested",
      Change::SwitchCompleted { .. } => "switch_completed",
      Change::SwitchFailed { .. } => "switch_failed",
      Change::Reconciled { .. } => "reconciled",
      Change::GateRecorded { .. } => "gate_recorded",
      Change::WorkloadExcluded { .. } => "workload_excluded",
      Change::AwaitingDecision { .. } => "awaiting_decision",
      Change::IssueRaised { .. } => "issue_raised",
      Change::PlanRecorded { .. } => "plan_recorded",
      Change::PhaseEntered { .. } => "phase_entered",
      Change::PhaseRejected { .. } => "phase_rejected",
      Change::RollbackDecided { .. } => "rollback_decided",
    }
  }
}

/// An event as stored, with its assigned sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub sequence: u64,
  pub timestamp: DateTime<Utc>,
  /// Workload id, `phase:<name>`, or `orchestrator`.
  pub entity_id: String,
  pub change: Change,
  /// Human-readable reason for the change, e.g. "post_cutover gate passed".
  pub cause: String,
}

/// An event waiting to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
  pub timestamp: DateTime<Utc>,
  pub entity_id: String,
  pub change: Change,
  pub cause: String,
}

impl NewEvent {
  pub fn new(
    timestamp: DateTime<Utc>,
    entity_id: impl Into<String>,
    change: Change,
    cause: impl Into<String>,
  ) -> Self {
    Self {
      timestamp,
      entity_id: entity_id.into(),
      change,
      cause: cause.into(),
    }
  }

  pub(crate) fn into_event(self, sequence: u64) -> Event {
    Event {
      sequence,
      timestamp: self.timestamp,
      entity_id: self.entity_id,
      change: self.change,
      cause: self.cause,
    }
  }
}
