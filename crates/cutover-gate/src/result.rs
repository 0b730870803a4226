use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::CheckOutcome;

/// Where in the workflow a gate is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
  PreCutover,
  PostCutover,
  /// Find out which side a workload is attached to after an unknown switch outcome.
  Reconcile,
  PhaseEntry,
}

impl fmt::Display for GateStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GateStage::PreCutover => f.write_str("pre_cutover"),
      GateStage::PostCutover => f.write_str("post_cutover"),
      GateStage::Reconcile => f.write_str("reconcile"),
      GateStage::PhaseEntry => f.write_str("phase_entry"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
  Pass,
  Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
  pub check_id: String,
  pub verdict: Verdict,
  /// Every attempt in order.
  pub attempts: Vec<CheckOutcome>,
  /// The final attempt timed out and no retries were left.
  pub timed_out: bool,
  pub diagnostic: serde_json::Value,
}

impl CheckResult {
  pub fn passed(&self) -> bool {
    self.verdict == Verdict::Pass
  }
}

/// Aggregate outcome of one gate run. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
  pub target_id: String,
  pub stage: GateStage,
  pub verdict: Verdict,
  pub checks: Vec<CheckResult>,
  /// Ids of checks that did not pass, in check-set order.
  pub failing: Vec<String>,
  pub recorded_at: DateTime<Utc>,
}

impl GateResult {
  pub fn passed(&self) -> bool {
    self.verdict == Verdict::Pass
  }

  /// At least one failing check never answered.
  pub fn inconclusive(&self) -> bool {
    self
      .checks
      .iter()
      .any(|check| !check.passed() && check.timed_out)
  }
}
