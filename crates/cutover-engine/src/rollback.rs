//! Rollback decisioning.
//!
//! A decision is a pure function of the materialized state, the phase
//! policies and the request time:
//!
//! 1. find the phase active at `now` and how long it has been (or was) active
//! 2. once Decommission has been entered, refuse Full scope and drop
//!    committed members, whatever phase `now` falls in
//! 3. look up the required actor class in the phase's authority bands; past
//!    the window the highest class is required
//! 4. approve if the requester holds that authority, otherwise escalate
//!
//! The affected set is the scope plus every transitive dependent that is not
//! committed, ordered dependents first.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use cutover_config::{ActorClass, OrchestratorConfig, Phase};
use cutover_model::{RollbackDecision, RollbackOutcome, RollbackScope, WorkloadId, WorkloadState};

use crate::error::{OrchestratorError, PhaseError};
use crate::state::MigrationState;

/// Workloads named by `scope`, evaluated against the phase active at `now`.
pub fn scope_members(
  view: &MigrationState,
  scope: &RollbackScope,
  now: DateTime<Utc>,
) -> Result<BTreeSet<WorkloadId>, OrchestratorError> {
  match scope {
    RollbackScope::Single { workload_id } => {
      if view.workload(workload_id).is_none() {
        return Err(OrchestratorError::UnknownWorkload(workload_id.clone()));
      }
      Ok(BTreeSet::from([workload_id.clone()]))
    }
    RollbackScope::Batch { phase, index } => view
      .plans
      .get(phase)
      .and_then(|plan| plan.batch(*index))
      .map(|batch| batch.workloads.iter().cloned().collect())
      .ok_or(OrchestratorError::UnknownBatch {
        phase: *phase,
        index: *index,
      }),
    RollbackScope::Full => {
      let phase = view.phase_at(now).ok_or(PhaseError::NotBegun)?.phase;
      Ok(
        view
          .scheduled_in(phase)
          .filter(|record| !record.excluded)
          .map(|record| record.id().to_string())
          .collect(),
      )
    }
  }
}

/// An earlier decision for `scope`, made in the phase active at `now`, whose
/// work is already done.
pub fn previous_decision<'a>(
  view: &'a MigrationState,
  scope: &RollbackScope,
  now: DateTime<Utc>,
) -> Option<&'a RollbackDecision> {
  let phase = view.phase_at(now)?.phase;
  let members = scope_members(view, scope, now).ok()?;
  let all_rolled_back = !members.is_empty()
    && members.iter().all(|id| {
      view
        .workload(id)
        .is_some_and(|record| record.state == WorkloadState::RolledBack)
    });
  if !all_rolled_back {
    return None;
  }

  view.decisions.iter().rev().find(|decision| {
    &decision.scope == scope && decision.phase == phase && decision.is_approved()
  })
}

/// Decide a rollback request. Nothing is executed here.
pub fn decide(
  view: &MigrationState,
  config: &OrchestratorConfig,
  scope: &RollbackScope,
  requested_by: ActorClass,
  now: DateTime<Utc>,
  decision_id: String,
) -> Result<RollbackDecision, OrchestratorError> {
  let phase_record = view.phase_at(now).ok_or(PhaseError::NotBegun)?;
  let phase = phase_record.phase;
  let elapsed = phase_record.elapsed_at(now);
  let elapsed_std = elapsed.to_std().unwrap_or_default();
  let policy = config.phase_policy(phase);

  let mut members = scope_members(view, scope, now)?;

  let decision = |required: ActorClass,
                  window_expired: bool,
                  affected: Vec<WorkloadId>,
                  outcome: RollbackOutcome,
                  reason: String| RollbackDecision {
    decision_id: decision_id.clone(),
    scope: scope.clone(),
    requested_by,
    phase,
    elapsed_secs: elapsed.num_seconds().max(0) as u64,
    required,
    window_expired,
    affected,
    outcome,
    reason,
    decided_at: now,
  };

  if phase == Phase::Decommission || view.has_entered(Phase::Decommission) {
    if *scope == RollbackScope::Full {
      return Ok(decision(
        ActorClass::HIGHEST,
        false,
        Vec::new(),
        RollbackOutcome::Denied,
        "full rollback is not possible once decommission has begun".to_string(),
      ));
    }

    members.retain(|id| {
      view
        .workload(id)
        .is_some_and(|record| record.state != WorkloadState::Committed)
    });
    if members.is_empty() {
      return Ok(decision(
        ActorClass::HIGHEST,
        false,
        Vec::new(),
        RollbackOutcome::Denied,
        "every workload in scope is committed and decommission has begun".to_string(),
      ));
    }
  }

  let (required, window_expired) = match policy.required_authority(scope.kind(), elapsed_std) {
    Some(required) => (required, false),
    None => (ActorClass::HIGHEST, true),
  };

  let affected = closure(view, &members);

  let (outcome, reason) = if requested_by >= required {
    (
      RollbackOutcome::Approved,
      format!("{requested_by} holds {required} authority for {scope} in {phase}"),
    )
  } else if window_expired {
    (
      RollbackOutcome::Escalated,
      format!("rollback window for {scope} in {phase} has expired; {required} approval required"),
    )
  } else {
    (
      RollbackOutcome::Escalated,
      format!("{scope} in {phase} requires {required} approval; requested by {requested_by}"),
    )
  };

  Ok(decision(required, window_expired, affected, outcome, reason))
}

/// `members` plus their uncommitted transitive dependents, minus anything
/// already rolled back, dependents first.
pub fn closure(view: &MigrationState, members: &BTreeSet<WorkloadId>) -> Vec<WorkloadId> {
  let graph = view.graph();

  let mut set: BTreeSet<WorkloadId> = graph
    .dependents_closure(members.iter().map(String::as_str))
    .into_iter()
    .filter(|id| {
      view
        .workload(id)
        .is_some_and(|record| record.state != WorkloadState::Committed)
    })
    .collect();
  set.extend(members.iter().cloned());
  set.retain(|id| {
    view
      .workload(id)
      .is_some_and(|record| record.state != WorkloadState::RolledBack)
  });

  // Registered inventories are acyclic.
  let order = graph
    .topological_order()
    .unwrap_or_else(|_| graph.nodes().map(str::to_string).collect());

  order
    .into_iter()
    .rev()
    .filter(|id| set.contains(id))
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use cutover_config::TransitionKind;
  use cutover_model::{Attachment, Workload};
  use cutover_store::{Change, Event};

  use super::*;

  struct Fixture {
    view: MigrationState,
    start: DateTime<Utc>,
  }

  impl Fixture {
    fn new(phase: Phase) -> Self {
      let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
      let mut fx = Self {
        view: MigrationState::default(),
        start,
      };
      fx.apply(start, "phase", Change::PhaseEntered { from: None, to: phase });
      fx
    }

    fn apply(&mut self, at: DateTime<Utc>, entity_id: &str, change: Change) {
      let sequence = self.view.last_sequence + 1;
      self.view.apply(&Event {
        sequence,
        timestamp: at,
        entity_id: entity_id.to_string(),
        change,
        cause: "test".to_string(),
      });
    }

    fn register(&mut self, id: &str, phase: Phase, deps: &[&str]) {
      let mut workload = Workload::new(
        id,
        "app",
        phase,
        Attachment::new("n9k", "Eth1/1", "vlan-1"),
        Attachment::new("leaf", "eth1/1", "epg-1"),
      );
      for dep in deps {
        workload = workload.depends_on(*dep);
      }
      self.apply(self.start, id, Change::WorkloadRegistered { workload });
    }

    fn set_state(&mut self, id: &str, to: WorkloadState) {
      let from = self.view.workload(id).unwrap().state;
      self.apply(
        self.start,
        id,
        Change::WorkloadTransition {
          kind: TransitionKind::Prepare,
          from,
          to,
        },
      );
    }

    fn decide(&self, scope: RollbackScope, by: ActorClass, after: Duration) -> RollbackDecision {
      decide(
        &self.view,
        &OrchestratorConfig::default(),
        &scope,
        by,
        self.start + after,
        "d-1".to_string(),
      )
      .unwrap()
    }
  }

  /// A <- B <- C, plus D <- C.
  fn chain(phase: Phase) -> Fixture {
    let mut fx = Fixture::new(phase);
    fx.register("A", Phase::Pilot, &[]);
    fx.register("B", Phase::Pilot, &["A"]);
    fx.register("C", Phase::Pilot, &["B", "D"]);
    fx.register("D", Phase::Pilot, &[]);
    fx
  }

  #[test]
  fn test_automation_approved_early_in_pilot() {
    let fx = chain(Phase::Pilot);
    let decision = fx.decide(RollbackScope::single("B"), ActorClass::Automation, Duration::hours(2));

    assert_eq!(decision.outcome, RollbackOutcome::Approved);
    assert_eq!(decision.required, ActorClass::Automation);
    assert_eq!(decision.affected, vec!["C", "B"]);
    assert_eq!(decision.elapsed_secs, 2 * 3600);
    assert!(!decision.window_expired);
  }

  #[test]
  fn test_insufficient_authority_escalates() {
    let fx = chain(Phase::Pilot);
    let decision = fx.decide(RollbackScope::single("B"), ActorClass::Automation, Duration::days(5));

    assert_eq!(decision.outcome, RollbackOutcome::Escalated);
    assert_eq!(decision.required, ActorClass::Engineer);
    assert_eq!(decision.affected, vec!["C", "B"]);
  }

  #[test]
  fn test_expired_window_needs_change_board() {
    let fx = chain(Phase::Pilot);
    let decision = fx.decide(RollbackScope::single("B"), ActorClass::Lead, Duration::days(20));

    assert!(decision.window_expired);
    assert_eq!(decision.required, ActorClass::ChangeBoard);
    assert_eq!(decision.outcome, RollbackOutcome::Escalated);

    let decision = fx.decide(
      RollbackScope::single("B"),
      ActorClass::ChangeBoard,
      Duration::days(20),
    );
    assert_eq!(decision.outcome, RollbackOutcome::Approved);
  }

  #[test]
  fn test_closure_skips_committed_dependents() {
    let mut fx = chain(Phase::Pilot);
    fx.set_state("A", WorkloadState::Committed);
    fx.set_state("B", WorkloadState::Committed);
    fx.set_state("C", WorkloadState::Committed);

    let decision = fx.decide(RollbackScope::single("A"), ActorClass::ChangeBoard, Duration::hours(1));
    assert_eq!(decision.affected, vec!["A"]);
  }

  #[test]
  fn test_closure_skips_rolled_back() {
    let mut fx = chain(Phase::Pilot);
    fx.set_state("C", WorkloadState::RolledBack);

    let decision = fx.decide(RollbackScope::single("A"), ActorClass::ChangeBoard, Duration::hours(1));
    assert_eq!(decision.affected, vec!["B", "A"]);
  }

  #[test]
  fn test_full_scope_denied_in_decommission() {
    let fx = chain(Phase::Decommission);
    let decision = fx.decide(RollbackScope::Full, ActorClass::ChangeBoard, Duration::hours(1));

    assert_eq!(decision.outcome, RollbackOutcome::Denied);
    assert!(decision.affected.is_empty());
  }

  #[test]
  fn test_decommission_drops_committed_members() {
    let mut fx = chain(Phase::Decommission);
    fx.set_state("A", WorkloadState::Committed);

    let denied = fx.decide(RollbackScope::single("A"), ActorClass::ChangeBoard, Duration::hours(1));
    assert_eq!(denied.outcome, RollbackOutcome::Denied);

    let approved = fx.decide(RollbackScope::single("D"), ActorClass::Lead, Duration::hours(1));
    assert_eq!(approved.outcome, RollbackOutcome::Approved);
    assert_eq!(approved.affected, vec!["C", "D"]);
  }

  #[test]
  fn test_backdated_request_after_decommission_keeps_committed() {
    let mut fx = chain(Phase::Pilot);
    fx.set_state("A", WorkloadState::Committed);
    let entered = fx.start + Duration::days(1);
    fx.apply(
      entered,
      "phase:decommission",
      Change::PhaseEntered {
        from: Some(Phase::Pilot),
        to: Phase::Decommission,
      },
    );

    let full = fx.decide(RollbackScope::Full, ActorClass::ChangeBoard, Duration::hours(1));
    assert_eq!(full.phase, Phase::Pilot);
    assert_eq!(full.outcome, RollbackOutcome::Denied);
    assert!(full.affected.is_empty());

    let single = fx.decide(RollbackScope::single("A"), ActorClass::ChangeBoard, Duration::hours(1));
    assert_eq!(single.outcome, RollbackOutcome::Denied);

    let uncommitted = fx.decide(RollbackScope::single("D"), ActorClass::Lead, Duration::hours(1));
    assert_eq!(uncommitted.outcome, RollbackOutcome::Approved);
    assert_eq!(uncommitted.affected, vec!["C", "D"]);
  }

  #[test]
  fn test_previous_decision_is_scoped_to_its_phase() {
    let mut fx = Fixture::new(Phase::Pilot);
    fx.register("A", Phase::Pilot, &[]);
    let decision = fx.decide(RollbackScope::Full, ActorClass::ChangeBoard, Duration::hours(1));
    let at = fx.start + Duration::hours(1);
    fx.apply(at, "rollback", Change::RollbackDecided { decision: decision.clone() });
    fx.set_state("A", WorkloadState::RolledBack);
    assert_eq!(
      previous_decision(&fx.view, &RollbackScope::Full, at),
      Some(&decision)
    );

    // Nothing is scheduled in Bulk, so the pilot decision does not answer for it.
    let bulk = fx.start + Duration::days(1);
    fx.apply(
      bulk,
      "phase:bulk",
      Change::PhaseEntered {
        from: Some(Phase::Pilot),
        to: Phase::Bulk,
      },
    );
    let later = bulk + Duration::hours(1);
    assert!(previous_decision(&fx.view, &RollbackScope::Full, later).is_none());
  }

  #[test]
  fn test_unknown_batch_is_not_found() {
    let fx = chain(Phase::Pilot);
    let err = decide(
      &fx.view,
      &OrchestratorConfig::default(),
      &RollbackScope::Batch {
        phase: Phase::Pilot,
        index: 4,
      },
      ActorClass::Lead,
      fx.start,
      "d-1".to_string(),
    )
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownBatch { index: 4, .. }));
  }

  #[test]
  fn test_previous_decision_requires_rolled_back_scope() {
    let mut fx = chain(Phase::Pilot);
    let decision = fx.decide(RollbackScope::single("D"), ActorClass::Lead, Duration::hours(1));
    let at = fx.start;
    fx.apply(at, "rollback", Change::RollbackDecided { decision: decision.clone() });

    let scope = RollbackScope::single("D");
    assert!(previous_decision(&fx.view, &scope, at).is_none());

    fx.set_state("D", WorkloadState::RolledBack);
    assert_eq!(previous_decision(&fx.view, &scope, at), Some(&decision));
  }
}
