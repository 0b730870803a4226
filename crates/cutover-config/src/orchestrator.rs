use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::enums::{Phase, RetryBackoff};
use crate::phase::PhasePolicy;

/// Errors found while validating a configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("max_batch_size must be at least 1")]
  ZeroBatchSize,

  #[error("concurrency must be at least 1")]
  ZeroConcurrency,

  #[error("post_cutover check set is empty; nothing could ever be committed")]
  NoPostCutoverChecks,

  #[error("phase '{phase}' has an authority band of {band_hours}h beyond its {window_hours}h rollback window")]
  BandBeyondWindow {
    phase: Phase,
    band_hours: u64,
    window_hours: u64,
  },
}

/// Validation gate timing and retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
  /// Per-attempt timeout for a single probe call.
  pub check_timeout_ms: u64,
  /// Retries after a timed-out attempt. Failures are never retried.
  pub max_retry_attempts: u32,
  pub retry_backoff: RetryBackoff,
  pub retry_initial_delay_ms: u64,
  pub retry_max_delay_ms: u64,
}

impl GateConfig {
  pub fn check_timeout(&self) -> Duration {
    Duration::from_millis(self.check_timeout_ms)
  }

  /// Delay before retry number `retry` (1-based).
  pub fn retry_delay(&self, retry: u32) -> Duration {
    self.retry_backoff.delay(
      Duration::from_millis(self.retry_initial_delay_ms),
      retry,
      Duration::from_millis(self.retry_max_delay_ms),
    )
  }
}

impl Default for GateConfig {
  fn default() -> Self {
    Self {
      check_timeout_ms: 30_000,
      max_retry_attempts: 3,
      retry_backoff: RetryBackoff::Exponential,
      retry_initial_delay_ms: 1_000,
      retry_max_delay_ms: 30_000,
    }
  }
}

/// Named check sets run by the validation gate around a cutover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSets {
  /// Run against a prepared workload before its attachment is switched.
  pub pre_cutover: Vec<String>,
  /// Run after the switch; a pass is required to commit.
  pub post_cutover: Vec<String>,
  /// Run when a switch outcome is unknown, to find where the workload is attached.
  pub reconcile: Vec<String>,
}

impl Default for CheckSets {
  fn default() -> Self {
    Self {
      pre_cutover: vec!["source_reachable".to_string()],
      post_cutover: vec![
        "gateway_reachable".to_string(),
        "endpoint_learned".to_string(),
      ],
      reconcile: vec!["endpoint_learned".to_string()],
    }
  }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
  /// Largest number of workloads dispatched together in one batch.
  pub max_batch_size: usize,
  /// Default worker count for a run.
  pub concurrency: usize,
  /// Timeout for a single attachment-switch call.
  pub driver_timeout_ms: u64,
  /// Reset rolled-back workloads to not-started when a run begins.
  pub retry_rolled_back: bool,
  pub gate: GateConfig,
  pub checks: CheckSets,
  /// Per-phase overrides; phases without an entry use runbook defaults.
  #[serde(deserialize_with = "deserialize_phases")]
  pub phases: BTreeMap<Phase, PhasePolicy>,
}

/// Fields missing from a phase override keep that phase's runbook defaults.
fn deserialize_phases<'de, D>(deserializer: D) -> Result<BTreeMap<Phase, PhasePolicy>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = BTreeMap::<Phase, serde_json::Map<String, serde_json::Value>>::deserialize(deserializer)?;

  raw
    .into_iter()
    .map(|(phase, overrides)| {
      let mut merged = match serde_json::to_value(PhasePolicy::for_phase(phase)) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
      };
      merged.extend(overrides);
      serde_json::from_value(serde_json::Value::Object(merged))
        .map(|policy| (phase, policy))
        .map_err(serde::de::Error::custom)
    })
    .collect()
}

impl OrchestratorConfig {
  /// Policy for `phase`, falling back to the runbook defaults.
  pub fn phase_policy(&self, phase: Phase) -> PhasePolicy {
    self
      .phases
      .get(&phase)
      .cloned()
      .unwrap_or_else(|| PhasePolicy::for_phase(phase))
  }

  pub fn driver_timeout(&self) -> Duration {
    Duration::from_millis(self.driver_timeout_ms)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_batch_size == 0 {
      return Err(ConfigError::ZeroBatchSize);
    }
    if self.concurrency == 0 {
      return Err(ConfigError::ZeroConcurrency);
    }
    if self.checks.post_cutover.is_empty() {
      return Err(ConfigError::NoPostCutoverChecks);
    }

    for phase in Phase::ALL {
      let policy = self.phase_policy(phase);
      if let Some(band) = policy
        .authority
        .iter()
        .find(|band| band.max_elapsed_hours > policy.rollback_window_hours)
      {
        return Err(ConfigError::BandBeyondWindow {
          phase,
          band_hours: band.max_elapsed_hours,
          window_hours: policy.rollback_window_hours,
        });
      }
    }

    Ok(())
  }
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      max_batch_size: 10,
      concurrency: 4,
      driver_timeout_ms: 120_000,
      retry_rolled_back: true,
      gate: GateConfig::default(),
      checks: CheckSets::default(),
      phases: BTreeMap::new(),
    }
  }
}
