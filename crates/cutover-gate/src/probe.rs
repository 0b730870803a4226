use async_trait::async_trait;
use cutover_config::Phase;
use cutover_model::Workload;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a check is run against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateTarget {
  Workload { workload: Workload },
  Phase { phase: Phase },
}

impl GateTarget {
  pub fn workload(workload: Workload) -> Self {
    GateTarget::Workload { workload }
  }

  pub fn phase(phase: Phase) -> Self {
    GateTarget::Phase { phase }
  }

  /// Entity id used in logs and audit events.
  pub fn id(&self) -> String {
    match self {
      GateTarget::Workload { workload } => workload.workload_id.clone(),
      GateTarget::Phase { phase } => format!("phase:{phase}"),
    }
  }
}

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
  Pass,
  Fail,
  Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
  pub outcome: CheckOutcome,
  /// Free-form evidence, e.g. ping loss or learned endpoint details.
  #[serde(default)]
  pub diagnostic: serde_json::Value,
}

impl ProbeReport {
  pub fn pass(diagnostic: serde_json::Value) -> Self {
    Self {
      outcome: CheckOutcome::Pass,
      diagnostic,
    }
  }

  pub fn fail(diagnostic: serde_json::Value) -> Self {
    Self {
      outcome: CheckOutcome::Fail,
      diagnostic,
    }
  }

  pub fn timeout() -> Self {
    Self {
      outcome: CheckOutcome::Timeout,
      diagnostic: serde_json::Value::Null,
    }
  }
}

/// The probe could not produce an outcome. The gate records this as a failure.
#[derive(Debug, Error)]
pub enum ProbeError {
  #[error("unknown check: {0}")]
  UnknownCheck(String),

  #[error("probe unavailable: {0}")]
  Unavailable(String),
}

/// A concrete validation check backend (ping, traceroute, contract hit
/// counters, endpoint tables, fabric health).
#[async_trait]
pub trait Probe: Send + Sync {
  async fn check(&self, check_id: &str, target: &GateTarget) -> Result<ProbeReport, ProbeError>;
}
