use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global stage of the migration program.
///
/// Phases are linear and ordered; the derived `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Prep,
  Pilot,
  Bulk,
  Optimize,
  Decommission,
}

impl Phase {
  pub const ALL: [Phase; 5] = [
    Phase::Prep,
    Phase::Pilot,
    Phase::Bulk,
    Phase::Optimize,
    Phase::Decommission,
  ];

  /// The phase that follows this one, if any.
  pub fn next(self) -> Option<Phase> {
    match self {
      Phase::Prep => Some(Phase::Pilot),
      Phase::Pilot => Some(Phase::Bulk),
      Phase::Bulk => Some(Phase::Optimize),
      Phase::Optimize => Some(Phase::Decommission),
      Phase::Decommission => None,
    }
  }

  /// The phase that precedes this one, if any.
  pub fn previous(self) -> Option<Phase> {
    match self {
      Phase::Prep => None,
      Phase::Pilot => Some(Phase::Prep),
      Phase::Bulk => Some(Phase::Pilot),
      Phase::Optimize => Some(Phase::Bulk),
      Phase::Decommission => Some(Phase::Optimize),
    }
  }

  /// Once entered, full-scope rollback is permanently denied.
  pub fn is_point_of_no_return(self) -> bool {
    self == Phase::Decommission
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Phase::Prep => "prep",
      Phase::Pilot => "pilot",
      Phase::Bulk => "bulk",
      Phase::Optimize => "optimize",
      Phase::Decommission => "decommission",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Kind of workload transition, used by phase policies to permit or forbid it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
  /// NotStarted -> Prepared
  Prepare,
  /// Prepared -> CutoverInProgress
  Cutover,
  /// CutoverInProgress -> PostValidating
  Validate,
  /// PostValidating -> Committed
  Commit,
  /// any -> RolledBack
  Rollback,
  /// RolledBack -> NotStarted
  Reset,
}

impl TransitionKind {
  pub const ALL: [TransitionKind; 6] = [
    TransitionKind::Prepare,
    TransitionKind::Cutover,
    TransitionKind::Validate,
    TransitionKind::Commit,
    TransitionKind::Rollback,
    TransitionKind::Reset,
  ];

  /// Forward transitions additionally require every predecessor to be committed.
  pub fn is_forward(self) -> bool {
    matches!(
      self,
      TransitionKind::Prepare
        | TransitionKind::Cutover
        | TransitionKind::Validate
        | TransitionKind::Commit
    )
  }
}

impl fmt::Display for TransitionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TransitionKind::Prepare => "prepare",
      TransitionKind::Cutover => "cutover",
      TransitionKind::Validate => "validate",
      TransitionKind::Commit => "commit",
      TransitionKind::Rollback => "rollback",
      TransitionKind::Reset => "reset",
    };
    f.write_str(s)
  }
}

/// Class of actor requesting a rollback, ordered by approval authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorClass {
  /// The orchestrator itself (automatic rollback policy).
  Automation,
  /// On-shift network engineer.
  Engineer,
  /// Migration lead.
  Lead,
  /// Change advisory board.
  ChangeBoard,
}

impl ActorClass {
  pub const HIGHEST: ActorClass = ActorClass::ChangeBoard;
}

impl fmt::Display for ActorClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ActorClass::Automation => "automation",
      ActorClass::Engineer => "engineer",
      ActorClass::Lead => "lead",
      ActorClass::ChangeBoard => "change_board",
    };
    f.write_str(s)
  }
}

/// Breadth of a rollback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
  Single,
  Batch,
  Full,
}

impl fmt::Display for ScopeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ScopeKind::Single => "single",
      ScopeKind::Batch => "batch",
      ScopeKind::Full => "full",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  Constant,
  Linear,
  Exponential,
}

impl RetryBackoff {
  /// Delay before retry number `retry` (1-based), capped at `max`.
  pub fn delay(self, initial: Duration, retry: u32, max: Duration) -> Duration {
    let retry = retry.max(1);
    let delay = match self {
      RetryBackoff::Constant => initial,
      RetryBackoff::Linear => initial.saturating_mul(retry),
      RetryBackoff::Exponential => {
        let factor = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
        initial.saturating_mul(factor)
      }
    };
    delay.min(max)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_phase_order_is_linear() {
    let mut phase = Phase::Prep;
    let mut seen = vec![phase];
    while let Some(next) = phase.next() {
      assert!(next > phase);
      assert_eq!(next.previous(), Some(phase));
      seen.push(next);
      phase = next;
    }
    assert_eq!(seen, Phase::ALL.to_vec());
    assert!(Phase::Decommission.is_point_of_no_return());
  }

  #[test]
  fn test_actor_authority_order() {
    assert!(ActorClass::Automation < ActorClass::Engineer);
    assert!(ActorClass::Engineer < ActorClass::Lead);
    assert!(ActorClass::Lead < ActorClass::ChangeBoard);
    assert_eq!(ActorClass::HIGHEST, ActorClass::ChangeBoard);
  }

  #[test]
  fn test_exponential_backoff_doubles_and_caps() {
    let initial = Duration::from_millis(100);
    let max = Duration::from_millis(1_000);
    let backoff = RetryBackoff::Exponential;

    assert_eq!(backoff.delay(initial, 1, max), Duration::from_millis(100));
    assert_eq!(backoff.delay(initial, 2, max), Duration::from_millis(200));
    assert_eq!(backoff.delay(initial, 3, max), Duration::from_millis(400));
    assert_eq!(backoff.delay(initial, 5, max), max);
    assert_eq!(backoff.delay(initial, 40, max), max);
  }

  #[test]
  fn test_linear_and_constant_backoff() {
    let initial = Duration::from_millis(50);
    let max = Duration::from_secs(10);

    assert_eq!(
      RetryBackoff::Linear.delay(initial, 3, max),
      Duration::from_millis(150)
    );
    assert_eq!(RetryBackoff::Constant.delay(initial, 7, max), initial);
  }

  #[test]
  fn test_phase_serializes_snake_case() {
    let json = serde_json::to_string(&Phase::Decommission).unwrap();
    assert_eq!(json, "\"decommission\"");
    let kind: TransitionKind = serde_json::from_str("\"rollback\"").unwrap();
    assert_eq!(kind, TransitionKind::Rollback);
  }
}
