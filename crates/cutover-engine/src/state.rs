//! Materialized view of the audit log.
//!
//! [`MigrationState`] is never written directly: every change goes through an
//! [`Event`] first and is folded in with [`MigrationState::apply`]. Replaying
//! the same events from an empty state always produces an equal value.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use cutover_config::{Phase, TransitionKind};
use cutover_gate::GateStage;
use cutover_model::{
  AttachmentSide, Direction, Graph, Plan, RollbackDecision, RollbackOutcome, Workload, WorkloadId,
  WorkloadState,
};
use cutover_store::{Change, Event};
use serde::Serialize;

/// Current knowledge about one workload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadRecord {
  pub workload: Workload,
  pub state: WorkloadState,
  /// Starts at 1; every reset begins a new attempt.
  pub attempt: u32,
  pub attached: AttachmentSide,
  /// A switch was requested and its outcome never recorded.
  pub pending_switch: Option<Direction>,
  /// The last switch failed or timed out and reconciliation has not settled it.
  pub needs_reconciliation: bool,
  /// A post-cutover gate passed during the current attempt.
  pub post_gate_passed: bool,
  pub awaiting_decision: bool,
  /// An approved rollback covers this workload and has not been carried out.
  pub rollback_approved: bool,
  pub excluded: bool,
  pub last_error: Option<String>,
  pub updated_at: DateTime<Utc>,
}

impl WorkloadRecord {
  fn new(workload: Workload, at: DateTime<Utc>) -> Self {
    Self {
      workload,
      state: WorkloadState::NotStarted,
      attempt: 1,
      attached: AttachmentSide::Source,
      pending_switch: None,
      needs_reconciliation: false,
      post_gate_passed: false,
      awaiting_decision: false,
      rollback_approved: false,
      excluded: false,
      last_error: None,
      updated_at: at,
    }
  }

  pub fn id(&self) -> &str {
    &self.workload.workload_id
  }

  /// Where the workload is attached cannot be trusted until a probe says so.
  pub fn is_unsettled(&self) -> bool {
    self.pending_switch.is_some() || self.needs_reconciliation
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseRecord {
  pub phase: Phase,
  pub entered_at: DateTime<Utc>,
  /// Set when the next phase is entered; freezes the rollback window clock.
  pub exited_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
  /// Time spent in the phase as of `now`, never negative.
  pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
    let end = match self.exited_at {
      Some(exited) if exited < now => exited,
      _ => now,
    };
    (end - self.entered_at).max(Duration::zero())
  }
}

/// A non-fatal problem surfaced through status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
  pub sequence: u64,
  pub entity_id: String,
  pub kind: String,
  pub message: String,
  pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationState {
  pub workloads: BTreeMap<WorkloadId, WorkloadRecord>,
  /// Entered phases, oldest first.
  pub phases: Vec<PhaseRecord>,
  pub plans: BTreeMap<Phase, Plan>,
  pub decisions: Vec<RollbackDecision>,
  pub issues: Vec<Issue>,
  pub last_sequence: u64,
}

impl MigrationState {
  pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
    let mut state = Self::default();
    for event in events {
      state.apply(event);
    }
    state
  }

  pub fn apply(&mut self, event: &Event) {
    self.last_sequence = event.sequence;
    let at = event.timestamp;

    match &event.change {
      Change::WorkloadRegistered { workload } => {
        self
          .workloads
          .entry(workload.workload_id.clone())
          .or_insert_with(|| WorkloadRecord::new(workload.clone(), at));
      }
      Change::WorkloadTransition { kind, to, .. } => {
        if let Some(record) = self.record_mut(&event.entity_id, at) {
          record.state = *to;
          match kind {
            TransitionKind::Reset => {
              record.attempt += 1;
              record.post_gate_passed = false;
              record.awaiting_decision = false;
              record.rollback_approved = false;
              record.last_error = None;
            }
            TransitionKind::Rollback => {
              record.post_gate_passed = false;
              record.awaiting_decision = false;
              record.rollback_approved = false;
            }
            _ => {}
          }
        }
      }
      Change::TransitionRejected { reason, .. } => {
        if let Some(record) = self.record_mut(&event.entity_id, at) {
          record.last_error = Some(reason.clone());
        }
      }
      Change::SwitchRequested { direction } => {
        if let Some(record) = self.record_mut(&event.entity_id, at) {
          record.pending_switch = Some(*direction);
        }
      }
      Change::SwitchCompleted { direction, .. } => {
        if let Some(record) = self.record_mut(&event.entity_id, at) {
          record.pending_switch = None;
          record.needs_reconciliation = false;
          record.attached = direction.destination();
        }
      }
      Change::SwitchFailed { error, .. } => {
        if let Some(record) = self.record_mut(&event.entity_id, at) {
          record.pending_switch = None;
          record.needs_reconciliation = true;
          record.attached = AttachmentSide::Unknown;
          record.last_error = Some(error.clone());
        }
      }
      Change::Reconciled { side, .. } => {
        if let Some(record) = self.record_mut(&event.entity_id, at) {
          record.pending_switch = None;
          record.attached = *side;
          record.needs_reconciliation = *side == AttachmentSide::Unknown;
        }
      }
      Change::GateRecorded { result } => {
        if result.stage == GateStage::PostCutover
          && let Some(record) = self.record_mut(&event.entity_id, at)
        {
          record.post_gate_passed = result.passed();
        }
      }
      Change::WorkloadExcluded { .. } => {
        if let Some(record) = self.record_mut(&event.entity_id, at) {
          record.excluded = true;
        }
      }
      Change::AwaitingDecision { reason } => {
        if let Some(record) = self.record_mut(&event.entity_id, at) {
          record.awaiting_decision = true;
          record.last_error = Some(reason.clone());
        }
      }
      Change::IssueRaised { kind, message } => {
        self.push_issue(event, kind, message);
      }
      Change::PhaseRejected { reason, .. } => {
        self.push_issue(event, "phase", reason);
      }
      Change::PlanRecorded { plan } => {
        self.plans.insert(plan.phase, plan.clone());
      }
      Change::PhaseEntered { to, .. } => {
        if let Some(last) = self.phases.last_mut() {
          last.exited_at = Some(at);
        }
        self.phases.push(PhaseRecord {
          phase: *to,
          entered_at: at,
          exited_at: None,
        });
      }
      Change::RollbackDecided { decision } => {
        for id in &decision.affected {
          if let Some(record) = self.record_mut(id, at) {
            match decision.outcome {
              RollbackOutcome::Approved => record.rollback_approved = true,
              RollbackOutcome::Escalated => record.awaiting_decision = true,
              RollbackOutcome::Denied => {}
            }
          }
        }
        self.decisions.push(decision.clone());
      }
    }
  }

  fn record_mut(&mut self, workload_id: &str, at: DateTime<Utc>) -> Option<&mut WorkloadRecord> {
    let record = self.workloads.get_mut(workload_id)?;
    record.updated_at = at;
    Some(record)
  }

  fn push_issue(&mut self, event: &Event, kind: &str, message: &str) {
    self.issues.push(Issue {
      sequence: event.sequence,
      entity_id: event.entity_id.clone(),
      kind: kind.to_string(),
      message: message.to_string(),
      raised_at: event.timestamp,
    });
  }

  pub fn workload(&self, workload_id: &str) -> Option<&WorkloadRecord> {
    self.workloads.get(workload_id)
  }

  pub fn current_phase(&self) -> Option<Phase> {
    self.phases.last().map(|record| record.phase)
  }

  pub fn current_phase_record(&self) -> Option<&PhaseRecord> {
    self.phases.last()
  }

  /// The phase that was active at `at`.
  pub fn phase_at(&self, at: DateTime<Utc>) -> Option<&PhaseRecord> {
    self
      .phases
      .iter()
      .rev()
      .find(|record| record.entered_at <= at)
  }

  pub fn has_entered(&self, phase: Phase) -> bool {
    self.phases.iter().any(|record| record.phase == phase)
  }

  pub fn inventory(&self) -> Vec<Workload> {
    self
      .workloads
      .values()
      .map(|record| record.workload.clone())
      .collect()
  }

  pub fn graph(&self) -> Graph {
    Graph::from_workloads(self.workloads.values().map(|record| &record.workload))
  }

  pub fn excluded(&self) -> BTreeSet<WorkloadId> {
    self
      .workloads
      .values()
      .filter(|record| record.excluded)
      .map(|record| record.id().to_string())
      .collect()
  }

  pub fn scheduled_in(&self, phase: Phase) -> impl Iterator<Item = &WorkloadRecord> {
    self
      .workloads
      .values()
      .filter(move |record| record.workload.phase == phase)
  }

  /// Workloads of `phase` blocking exit from it.
  pub fn pending_in(&self, phase: Phase) -> Vec<String> {
    self
      .scheduled_in(phase)
      .filter(|record| !record.excluded && record.state != WorkloadState::Committed)
      .map(|record| record.id().to_string())
      .collect()
  }
}
