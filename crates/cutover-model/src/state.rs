use std::fmt;

use cutover_config::TransitionKind;
use serde::{Deserialize, Serialize};

/// Lifecycle of a single workload.
///
/// ```text
/// NotStarted -> Prepared -> CutoverInProgress -> PostValidating -> Committed
///      ^                                                              |
///      |            (any state except RolledBack)                     |
///      +---- reset ---- RolledBack <----------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadState {
  NotStarted,
  Prepared,
  CutoverInProgress,
  PostValidating,
  Committed,
  RolledBack,
}

impl WorkloadState {
  pub const ALL: [WorkloadState; 6] = [
    WorkloadState::NotStarted,
    WorkloadState::Prepared,
    WorkloadState::CutoverInProgress,
    WorkloadState::PostValidating,
    WorkloadState::Committed,
    WorkloadState::RolledBack,
  ];

  pub fn is_terminal(self) -> bool {
    matches!(self, WorkloadState::Committed | WorkloadState::RolledBack)
  }

  /// The state reached by applying `kind`, if that edge exists from here.
  ///
  /// This only encodes the shape of the state machine; phase permission,
  /// predecessor and validation guards are enforced by the engine.
  pub fn successor(self, kind: TransitionKind) -> Option<WorkloadState> {
    use WorkloadState::*;

    match (self, kind) {
      (NotStarted, TransitionKind::Prepare) => Some(Prepared),
      (Prepared, TransitionKind::Cutover) => Some(CutoverInProgress),
      (CutoverInProgress, TransitionKind::Validate) => Some(PostValidating),
      (PostValidating, TransitionKind::Commit) => Some(Committed),
      (RolledBack, TransitionKind::Reset) => Some(NotStarted),
      (RolledBack, TransitionKind::Rollback) => None,
      (_, TransitionKind::Rollback) => Some(RolledBack),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      WorkloadState::NotStarted => "not_started",
      WorkloadState::Prepared => "prepared",
      WorkloadState::CutoverInProgress => "cutover_in_progress",
      WorkloadState::PostValidating => "post_validating",
      WorkloadState::Committed => "committed",
      WorkloadState::RolledBack => "rolled_back",
    }
  }
}

impl fmt::Display for WorkloadState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
