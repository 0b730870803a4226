use std::sync::Arc;
use std::time::Duration;

use cutover_config::GateConfig;
use cutover_model::Clock;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::probe::{CheckOutcome, GateTarget, Probe, ProbeReport};
use crate::result::{CheckResult, GateResult, GateStage, Verdict};

/// Runs check sets through a [`Probe`] with timeouts and timeout retries.
#[derive(Clone)]
pub struct ValidationGate {
  probe: Arc<dyn Probe>,
  config: GateConfig,
  clock: Arc<dyn Clock>,
}

impl ValidationGate {
  pub fn new(probe: Arc<dyn Probe>, config: GateConfig, clock: Arc<dyn Clock>) -> Self {
    Self {
      probe,
      config,
      clock,
    }
  }

  pub fn config(&self) -> &GateConfig {
    &self.config
  }

  /// Run `checks` with the configured per-check timeout.
  pub async fn run_stage(
    &self,
    target: &GateTarget,
    stage: GateStage,
    checks: &[String],
  ) -> GateResult {
    self
      .run_checks(target, stage, checks, self.config.check_timeout())
      .await
  }

  /// Run every check in `checks` concurrently against `target`.
  ///
  /// The verdict is Pass only if every check passed; an empty set passes.
  #[instrument(
    name = "gate_run_checks",
    skip(self, target, stage, checks, timeout),
    fields(target = %target.id(), stage = %stage, checks = checks.len())
  )]
  pub async fn run_checks(
    &self,
    target: &GateTarget,
    stage: GateStage,
    checks: &[String],
    timeout: Duration,
  ) -> GateResult {
    let results = join_all(
      checks
        .iter()
        .map(|check_id| self.run_check(check_id, target, timeout)),
    )
    .await;

    let failing: Vec<String> = results
      .iter()
      .filter(|check| !check.passed())
      .map(|check| check.check_id.clone())
      .collect();

    let verdict = if failing.is_empty() {
      Verdict::Pass
    } else {
      Verdict::Fail
    };

    match verdict {
      Verdict::Pass => info!(target = %target.id(), stage = %stage, "gate_passed"),
      Verdict::Fail => warn!(
        target = %target.id(),
        stage = %stage,
        failing = ?failing,
        "gate_failed"
      ),
    }

    GateResult {
      target_id: target.id(),
      stage,
      verdict,
      checks: results,
      failing,
      recorded_at: self.clock.now(),
    }
  }

  async fn run_check(&self, check_id: &str, target: &GateTarget, timeout: Duration) -> CheckResult {
    let mut attempts = Vec::new();

    loop {
      let report = match tokio::time::timeout(timeout, self.probe.check(check_id, target)).await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => ProbeReport::fail(json!({ "error": e.to_string() })),
        Err(_) => ProbeReport::timeout(),
      };
      attempts.push(report.outcome);

      let verdict = match report.outcome {
        CheckOutcome::Pass => Verdict::Pass,
        CheckOutcome::Fail => Verdict::Fail,
        CheckOutcome::Timeout => {
          let retry = attempts.len() as u32;
          if retry > self.config.max_retry_attempts {
            warn!(check_id, attempts = attempts.len(), "check_timed_out");
            return CheckResult {
              check_id: check_id.to_string(),
              verdict: Verdict::Fail,
              timed_out: true,
              diagnostic: json!({
                "timeouts": attempts.len(),
                "timeout_ms": timeout.as_millis() as u64,
              }),
              attempts,
            };
          }

          let delay = self.config.retry_delay(retry);
          debug!(check_id, retry, delay_ms = delay.as_millis() as u64, "check_retry");
          tokio::time::sleep(delay).await;
          continue;
        }
      };

      return CheckResult {
        check_id: check_id.to_string(),
        verdict,
        attempts,
        timed_out: false,
        diagnostic: report.diagnostic,
      };
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;
  use std::sync::Mutex;

  use async_trait::async_trait;
  use cutover_config::{Phase, RetryBackoff};
  use cutover_model::SystemClock;

  use super::*;
  use crate::probe::ProbeError;

  /// Replays a fixed outcome sequence per check; the last one repeats.
  #[derive(Default)]
  struct Scripted {
    outcomes: Mutex<HashMap<String, Vec<CheckOutcome>>>,
    calls: Mutex<HashMap<String, usize>>,
  }

  impl Scripted {
    fn with(self, check_id: &str, outcomes: &[CheckOutcome]) -> Self {
      self
        .outcomes
        .lock()
        .unwrap()
        .insert(check_id.to_string(), outcomes.to_vec());
      self
    }

    fn calls(&self, check_id: &str) -> usize {
      self.calls.lock().unwrap().get(check_id).copied().unwrap_or(0)
    }
  }

  #[async_trait]
  impl Probe for Scripted {
    async fn check(&self, check_id: &str, _target: &GateTarget) -> Result<ProbeReport, ProbeError> {
      let call = {
        let mut calls = self.calls.lock().unwrap();
        let call = calls.entry(check_id.to_string()).or_default();
        *call += 1;
        *call - 1
      };
      let outcome = {
        let outcomes = self.outcomes.lock().unwrap();
        let script = outcomes
          .get(check_id)
          .ok_or_else(|| ProbeError::UnknownCheck(check_id.to_string()))?;
        script[call.min(script.len() - 1)]
      };

      match outcome {
        CheckOutcome::Pass => Ok(ProbeReport::pass(json!({ "call": call }))),
        CheckOutcome::Fail => Ok(ProbeReport::fail(json!({ "call": call }))),
        CheckOutcome::Timeout => {
          tokio::time::sleep(Duration::from_secs(3600)).await;
          Ok(ProbeReport::pass(json!(null)))
        }
      }
    }
  }

  fn gate(probe: Arc<Scripted>, retries: u32) -> ValidationGate {
    let config = GateConfig {
      check_timeout_ms: 100,
      max_retry_attempts: retries,
      retry_backoff: RetryBackoff::Constant,
      retry_initial_delay_ms: 10,
      retry_max_delay_ms: 10,
    };
    ValidationGate::new(probe, config, Arc::new(SystemClock))
  }

  fn checks(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
  }

  fn target() -> GateTarget {
    GateTarget::phase(Phase::Pilot)
  }

  #[tokio::test(start_paused = true)]
  async fn test_all_pass() {
    let probe = Arc::new(
      Scripted::default()
        .with("ping", &[CheckOutcome::Pass])
        .with("arp", &[CheckOutcome::Pass]),
    );
    let result = gate(probe, 3)
      .run_stage(&target(), GateStage::PostCutover, &checks(&["ping", "arp"]))
      .await;

    assert!(result.passed());
    assert!(result.failing.is_empty());
    assert_eq!(result.checks.len(), 2);
    assert_eq!(result.target_id, "phase:pilot");
  }

  #[tokio::test(start_paused = true)]
  async fn test_fail_is_not_retried() {
    let probe = Arc::new(
      Scripted::default()
        .with("ping", &[CheckOutcome::Pass])
        .with("contracts", &[CheckOutcome::Fail, CheckOutcome::Pass]),
    );
    let result = gate(probe.clone(), 3)
      .run_stage(
        &target(),
        GateStage::PostCutover,
        &checks(&["ping", "contracts"]),
      )
      .await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.failing, vec!["contracts"]);
    assert_eq!(probe.calls("contracts"), 1);
    assert!(!result.inconclusive());
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_is_retried_then_passes() {
    let probe = Arc::new(
      Scripted::default().with("ping", &[CheckOutcome::Timeout, CheckOutcome::Pass]),
    );
    let result = gate(probe.clone(), 3)
      .run_stage(&target(), GateStage::PreCutover, &checks(&["ping"]))
      .await;

    assert!(result.passed());
    assert_eq!(
      result.checks[0].attempts,
      vec![CheckOutcome::Timeout, CheckOutcome::Pass]
    );
    assert_eq!(probe.calls("ping"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhausted_timeouts_become_fail() {
    let probe = Arc::new(Scripted::default().with("ping", &[CheckOutcome::Timeout]));
    let result = gate(probe.clone(), 2)
      .run_stage(&target(), GateStage::Reconcile, &checks(&["ping"]))
      .await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert!(result.checks[0].timed_out);
    assert_eq!(result.checks[0].attempts.len(), 3);
    assert_eq!(result.checks[0].diagnostic["timeouts"], 3);
    assert!(result.inconclusive());
  }

  #[tokio::test(start_paused = true)]
  async fn test_empty_set_passes() {
    let probe = Arc::new(Scripted::default());
    let result = gate(probe, 3)
      .run_stage(&target(), GateStage::PhaseEntry, &[])
      .await;

    assert!(result.passed());
    assert!(result.checks.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_probe_error_is_a_fail() {
    let probe = Arc::new(Scripted::default());
    let result = gate(probe, 3)
      .run_stage(&target(), GateStage::PostCutover, &checks(&["unknown"]))
      .await;

    assert_eq!(result.failing, vec!["unknown"]);
    assert!(
      result.checks[0].diagnostic["error"]
        .as_str()
        .unwrap()
        .contains("unknown check")
    );
  }
}
