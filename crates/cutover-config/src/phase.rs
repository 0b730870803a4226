use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enums::{ActorClass, Phase, ScopeKind, TransitionKind};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24;

/// One row of the rollback decision-authority table.
///
/// A band applies to rollbacks of `scope` requested no later than
/// `max_elapsed_hours` after the phase was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityBand {
  pub scope: ScopeKind,
  pub max_elapsed_hours: u64,
  pub required: ActorClass,
}

impl AuthorityBand {
  pub fn new(scope: ScopeKind, max_elapsed_hours: u64, required: ActorClass) -> Self {
    Self {
      scope,
      max_elapsed_hours,
      required,
    }
  }

  pub fn max_elapsed(&self) -> Duration {
    Duration::from_secs(self.max_elapsed_hours.saturating_mul(HOUR))
  }
}

/// What a phase permits and how rollbacks inside it are authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasePolicy {
  /// Workload transitions legal while this phase is active.
  pub allowed: BTreeSet<TransitionKind>,
  /// Roll back a workload automatically when its validation fails.
  pub automatic_rollback: bool,
  /// Past this, every rollback needs the highest authority.
  pub rollback_window_hours: u64,
  /// Bands are consulted in order; the first match wins.
  pub authority: Vec<AuthorityBand>,
  /// Checks that must pass before this phase may be entered.
  pub entry_checks: Vec<String>,
}

impl PhasePolicy {
  /// Runbook defaults for `phase`.
  ///
  /// Pilot-scale rollbacks within the first days are low authority; the
  /// required authority grows with scope and with time spent in the phase.
  pub fn for_phase(phase: Phase) -> Self {
    use ActorClass::*;
    use ScopeKind::*;

    let every = TransitionKind::ALL.into_iter().collect::<BTreeSet<_>>();

    match phase {
      Phase::Prep => Self {
        allowed: [
          TransitionKind::Prepare,
          TransitionKind::Rollback,
          TransitionKind::Reset,
        ]
        .into_iter()
        .collect(),
        automatic_rollback: false,
        rollback_window_hours: 14 * DAY,
        authority: vec![
          AuthorityBand::new(Single, 14 * DAY, Engineer),
          AuthorityBand::new(Batch, 14 * DAY, Engineer),
          AuthorityBand::new(Full, 14 * DAY, Lead),
        ],
        entry_checks: Vec::new(),
      },
      Phase::Pilot => Self {
        allowed: every,
        automatic_rollback: true,
        rollback_window_hours: 14 * DAY,
        authority: vec![
          AuthorityBand::new(Single, 3 * DAY, Automation),
          AuthorityBand::new(Batch, 3 * DAY, Engineer),
          AuthorityBand::new(Full, 3 * DAY, Lead),
          AuthorityBand::new(Single, 14 * DAY, Engineer),
          AuthorityBand::new(Batch, 14 * DAY, Lead),
          AuthorityBand::new(Full, 14 * DAY, ChangeBoard),
        ],
        entry_checks: Vec::new(),
      },
      Phase::Bulk => Self {
        allowed: every,
        automatic_rollback: true,
        rollback_window_hours: 21 * DAY,
        authority: vec![
          AuthorityBand::new(Single, DAY, Automation),
          AuthorityBand::new(Batch, DAY, Engineer),
          AuthorityBand::new(Full, 3 * DAY, Lead),
          AuthorityBand::new(Single, 7 * DAY, Engineer),
          AuthorityBand::new(Batch, 7 * DAY, Lead),
          AuthorityBand::new(Full, 21 * DAY, ChangeBoard),
        ],
        entry_checks: Vec::new(),
      },
      Phase::Optimize => Self {
        allowed: every,
        automatic_rollback: false,
        rollback_window_hours: 21 * DAY,
        authority: vec![
          AuthorityBand::new(Single, 7 * DAY, Engineer),
          AuthorityBand::new(Batch, 7 * DAY, Lead),
          AuthorityBand::new(Full, 21 * DAY, ChangeBoard),
        ],
        entry_checks: Vec::new(),
      },
      Phase::Decommission => Self {
        allowed: [TransitionKind::Rollback].into_iter().collect(),
        automatic_rollback: false,
        rollback_window_hours: 7 * DAY,
        authority: vec![
          AuthorityBand::new(Single, 7 * DAY, Lead),
          AuthorityBand::new(Batch, 7 * DAY, ChangeBoard),
        ],
        entry_checks: Vec::new(),
      },
    }
  }

  pub fn permits(&self, kind: TransitionKind) -> bool {
    self.allowed.contains(&kind)
  }

  pub fn rollback_window(&self) -> Duration {
    Duration::from_secs(self.rollback_window_hours.saturating_mul(HOUR))
  }

  /// Authority required to roll back `scope` after `elapsed` in the phase.
  ///
  /// Returns `None` when the window has expired for this scope: past the
  /// phase's rollback window, or past every band configured for the scope.
  pub fn required_authority(&self, scope: ScopeKind, elapsed: Duration) -> Option<ActorClass> {
    if elapsed > self.rollback_window() {
      return None;
    }

    self
      .authority
      .iter()
      .find(|band| band.scope == scope && elapsed <= band.max_elapsed())
      .map(|band| band.required)
  }
}

impl Default for PhasePolicy {
  fn default() -> Self {
    Self::for_phase(Phase::Bulk)
  }
}
