//! Workload transition guards.

use cutover_config::{OrchestratorConfig, Phase, TransitionKind};
use cutover_model::{AttachmentSide, WorkloadState};

use crate::error::TransitionError;
use crate::state::{MigrationState, WorkloadRecord};

/// Check whether `kind` may be applied to `record` right now and return the
/// resulting state.
///
/// Every transition needs an edge in the state machine and permission from
/// the active phase. Forward transitions also need every predecessor
/// committed; rollback and reset are gated by the phase only.
pub fn check_transition(
  view: &MigrationState,
  config: &OrchestratorConfig,
  record: &WorkloadRecord,
  kind: TransitionKind,
) -> Result<WorkloadState, TransitionError> {
  let workload_id = record.id().to_string();

  let to = record
    .state
    .successor(kind)
    .ok_or_else(|| TransitionError::IllegalEdge {
      workload_id: workload_id.clone(),
      kind,
      from: record.state,
    })?;

  let phase = view.current_phase();
  let permitted = phase.is_some_and(|phase| config.phase_policy(phase).permits(kind));
  if !permitted {
    return Err(TransitionError::PhaseForbids {
      workload_id,
      phase,
      kind,
    });
  }

  if kind.is_forward() {
    if record.excluded {
      return Err(TransitionError::Excluded { workload_id });
    }

    let pending: Vec<String> = record
      .workload
      .dependencies
      .iter()
      .filter(|dependency| {
        view
          .workload(dependency)
          .is_none_or(|upstream| upstream.state != WorkloadState::Committed)
      })
      .cloned()
      .collect();
    if !pending.is_empty() {
      return Err(TransitionError::PredecessorsPending {
        workload_id,
        pending,
      });
    }
  }

  match kind {
    TransitionKind::Validate if record.attached != AttachmentSide::Target => {
      Err(TransitionError::NotOnTarget { workload_id })
    }
    TransitionKind::Commit if !record.post_gate_passed => {
      Err(TransitionError::NotValidated { workload_id })
    }
    TransitionKind::Commit if record.attached != AttachmentSide::Target => {
      Err(TransitionError::NotOnTarget { workload_id })
    }
    TransitionKind::Rollback
      if record.state == WorkloadState::Committed && phase == Some(Phase::Decommission) =>
    {
      Err(TransitionError::PastPointOfNoReturn { workload_id })
    }
    _ => Ok(to),
  }
}

#[cfg(test)]
mod tests {
  use chrono::{DateTime, Utc};
  use cutover_gate::{GateResult, GateStage, Verdict};
  use cutover_model::{Attachment, Workload};
  use cutover_store::{Change, Event};

  use super::*;

  struct Fixture {
    view: MigrationState,
    sequence: u64,
  }

  impl Fixture {
    fn new(phase: Phase) -> Self {
      let mut fixture = Self {
        view: MigrationState::default(),
        sequence: 0,
      };
      fixture.apply("phase", Change::PhaseEntered { from: None, to: phase });
      fixture
    }

    fn apply(&mut self, entity_id: &str, change: Change) {
      self.sequence += 1;
      self.view.apply(&Event {
        sequence: self.sequence,
        timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        entity_id: entity_id.to_string(),
        change,
        cause: "test".to_string(),
      });
    }

    fn register(&mut self, workload: Workload) {
      let id = workload.workload_id.clone();
      self.apply(&id, Change::WorkloadRegistered { workload });
    }

    fn set_state(&mut self, id: &str, to: WorkloadState) {
      let from = self.view.workload(id).unwrap().state;
      self.apply(
        id,
        Change::WorkloadTransition {
          kind: TransitionKind::Prepare,
          from,
          to,
        },
      );
    }

    fn check(&self, id: &str, kind: TransitionKind) -> Result<WorkloadState, TransitionError> {
      check_transition(
        &self.view,
        &OrchestratorConfig::default(),
        self.view.workload(id).unwrap(),
        kind,
      )
    }
  }

  fn workload(id: &str) -> Workload {
    Workload::new(
      id,
      "app",
      Phase::Pilot,
      Attachment::new("n9k-1", "Eth1/1", "vlan-1"),
      Attachment::new("leaf-1", "eth1/1", "epg-app"),
    )
  }

  #[test]
  fn test_prepare_requires_committed_predecessors() {
    let mut fx = Fixture::new(Phase::Pilot);
    fx.register(workload("A"));
    fx.register(workload("B").depends_on("A"));

    assert_eq!(
      fx.check("B", TransitionKind::Prepare),
      Err(TransitionError::PredecessorsPending {
        workload_id: "B".to_string(),
        pending: vec!["A".to_string()],
      })
    );

    fx.set_state("A", WorkloadState::Committed);
    assert_eq!(
      fx.check("B", TransitionKind::Prepare),
      Ok(WorkloadState::Prepared)
    );
  }

  #[test]
  fn test_rollback_ignores_predecessors() {
    let mut fx = Fixture::new(Phase::Pilot);
    fx.register(workload("A"));
    fx.register(workload("B").depends_on("A"));
    fx.set_state("A", WorkloadState::RolledBack);

    assert_eq!(
      fx.check("B", TransitionKind::Rollback),
      Ok(WorkloadState::RolledBack)
    );
  }

  #[test]
  fn test_prep_forbids_cutover() {
    let mut fx = Fixture::new(Phase::Prep);
    fx.register(workload("A"));
    fx.set_state("A", WorkloadState::Prepared);

    assert!(matches!(
      fx.check("A", TransitionKind::Cutover),
      Err(TransitionError::PhaseForbids {
        phase: Some(Phase::Prep),
        ..
      })
    ));
  }

  #[test]
  fn test_commit_requires_post_gate_pass() {
    let mut fx = Fixture::new(Phase::Pilot);
    fx.register(workload("A"));
    fx.set_state("A", WorkloadState::PostValidating);

    assert_eq!(
      fx.check("A", TransitionKind::Commit),
      Err(TransitionError::NotValidated {
        workload_id: "A".to_string()
      })
    );
  }

  #[test]
  fn test_commit_requires_target_attachment() {
    let mut fx = Fixture::new(Phase::Pilot);
    fx.register(workload("A"));
    fx.set_state("A", WorkloadState::PostValidating);
    fx.apply(
      "A",
      Change::GateRecorded {
        result: GateResult {
          target_id: "A".to_string(),
          stage: GateStage::PostCutover,
          verdict: Verdict::Pass,
          checks: Vec::new(),
          failing: Vec::new(),
          recorded_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        },
      },
    );
    assert!(fx.view.workload("A").unwrap().post_gate_passed);

    assert_eq!(
      fx.check("A", TransitionKind::Commit),
      Err(TransitionError::NotOnTarget {
        workload_id: "A".to_string()
      })
    );
  }

  #[test]
  fn test_validate_requires_target_attachment() {
    let mut fx = Fixture::new(Phase::Pilot);
    fx.register(workload("A"));
    fx.set_state("A", WorkloadState::CutoverInProgress);

    assert!(matches!(
      fx.check("A", TransitionKind::Validate),
      Err(TransitionError::NotOnTarget { .. })
    ));
  }

  #[test]
  fn test_skipping_states_is_illegal() {
    let mut fx = Fixture::new(Phase::Pilot);
    fx.register(workload("A"));

    assert!(matches!(
      fx.check("A", TransitionKind::Commit),
      Err(TransitionError::IllegalEdge { .. })
    ));
  }

  #[test]
  fn test_committed_is_final_in_decommission() {
    let mut fx = Fixture::new(Phase::Decommission);
    fx.register(workload("A"));
    fx.set_state("A", WorkloadState::Committed);

    assert!(matches!(
      fx.check("A", TransitionKind::Rollback),
      Err(TransitionError::PastPointOfNoReturn { .. })
    ));
  }

  #[test]
  fn test_nothing_moves_before_begin() {
    let mut view = MigrationState::default();
    view.apply(&Event {
      sequence: 1,
      timestamp: Utc::now(),
      entity_id: "A".to_string(),
      change: Change::WorkloadRegistered {
        workload: workload("A"),
      },
      cause: "test".to_string(),
    });

    let result = check_transition(
      &view,
      &OrchestratorConfig::default(),
      view.workload("A").unwrap(),
      TransitionKind::Prepare,
    );
    assert!(matches!(
      result,
      Err(TransitionError::PhaseForbids { phase: None, .. })
    ));
  }
}
