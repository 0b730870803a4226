//! Shared fakes for orchestrator integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cutover_config::{GateConfig, OrchestratorConfig, Phase, RetryBackoff};
use cutover_engine::{
  AttachmentDriver, Collaborators, DriverError, Orchestrator, StaticInventory,
};
use cutover_gate::{CheckOutcome, GateTarget, Probe, ProbeError, ProbeReport};
use cutover_model::{Attachment, Direction, ManualClock, Workload};
use cutover_store::{Change, Error, Event, EventLog, MemoryEventLog, NewEvent};
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub const PRE: &str = "source_reachable";
pub const GATEWAY: &str = "gateway_reachable";
pub const ENDPOINT: &str = "endpoint_learned";
pub const ATTACHMENT: &str = "attachment_probe";

pub fn start() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

pub fn workload(id: &str, phase: Phase, deps: &[&str]) -> Workload {
  let mut workload = Workload::new(
    id,
    "app",
    phase,
    Attachment::new("n7k-01", "Eth1/1", format!("vlan-{id}")),
    Attachment::new("leaf-101", "eth1/1", format!("epg-{id}")),
  );
  for dep in deps {
    workload = workload.depends_on(*dep);
  }
  workload
}

pub fn config() -> OrchestratorConfig {
  let mut config = OrchestratorConfig {
    max_batch_size: 10,
    concurrency: 4,
    driver_timeout_ms: 500,
    gate: GateConfig {
      check_timeout_ms: 500,
      max_retry_attempts: 1,
      retry_backoff: RetryBackoff::Constant,
      retry_initial_delay_ms: 1,
      retry_max_delay_ms: 1,
    },
    ..OrchestratorConfig::default()
  };
  config.checks.pre_cutover = vec![PRE.to_string()];
  config.checks.post_cutover = vec![GATEWAY.to_string(), ENDPOINT.to_string()];
  config.checks.reconcile = vec![ATTACHMENT.to_string()];
  config
}

/// Passes every check unless told otherwise for a (check, target) pair.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
  outcomes: Mutex<HashMap<(String, String), CheckOutcome>>,
  calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedProbe {
  pub fn set(&self, check_id: &str, target_id: &str, outcome: CheckOutcome) {
    self
      .outcomes
      .lock()
      .unwrap()
      .insert((check_id.to_string(), target_id.to_string()), outcome);
  }

  pub fn calls(&self, check_id: &str, target_id: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(c, t)| c == check_id && t == target_id)
      .count()
  }
}

#[async_trait]
impl Probe for ScriptedProbe {
  async fn check(&self, check_id: &str, target: &GateTarget) -> Result<ProbeReport, ProbeError> {
    let key = (check_id.to_string(), target.id());
    self.calls.lock().unwrap().push(key.clone());
    let outcome = self
      .outcomes
      .lock()
      .unwrap()
      .get(&key)
      .copied()
      .unwrap_or(CheckOutcome::Pass);
    Ok(match outcome {
      CheckOutcome::Pass => ProbeReport::pass(json!({ "check": check_id })),
      CheckOutcome::Fail => ProbeReport::fail(json!({ "check": check_id, "reason": "scripted" })),
      CheckOutcome::Timeout => ProbeReport::timeout(),
    })
  }
}

/// Succeeds unless a failure is scripted for a (workload, direction) pair.
#[derive(Debug, Default)]
pub struct ScriptedDriver {
  failures: Mutex<HashMap<(String, Direction), DriverError>>,
  crashes: Mutex<HashSet<String>>,
  calls: Mutex<Vec<(String, Direction)>>,
  delay: Mutex<Option<Duration>>,
  cancel_on_switch: Mutex<Option<CancellationToken>>,
  in_flight: AtomicUsize,
  peak: AtomicUsize,
}

impl ScriptedDriver {
  pub fn fail(&self, workload_id: &str, direction: Direction, error: DriverError) {
    self
      .failures
      .lock()
      .unwrap()
      .insert((workload_id.to_string(), direction), error);
  }

  /// Panic inside `switch` for `workload_id`.
  pub fn crash(&self, workload_id: &str) {
    self.crashes.lock().unwrap().insert(workload_id.to_string());
  }

  /// Hold every switch for `delay` before answering.
  pub fn delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Cancel `token` as soon as the next switch starts.
  pub fn cancel_on_switch(&self, token: CancellationToken) {
    *self.cancel_on_switch.lock().unwrap() = Some(token);
  }

  /// Most switches ever running at the same time.
  pub fn peak_in_flight(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }

  pub fn clear(&self) {
    self.failures.lock().unwrap().clear();
  }

  pub fn calls(&self) -> Vec<(String, Direction)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_for(&self, workload_id: &str) -> Vec<Direction> {
    self
      .calls()
      .into_iter()
      .filter(|(id, _)| id == workload_id)
      .map(|(_, direction)| direction)
      .collect()
  }
}

#[async_trait]
impl AttachmentDriver for ScriptedDriver {
  async fn switch(
    &self,
    workload: &Workload,
    direction: Direction,
  ) -> Result<serde_json::Value, DriverError> {
    let key = (workload.workload_id.clone(), direction);
    self.calls.lock().unwrap().push(key.clone());
    let token = self.cancel_on_switch.lock().unwrap().take();
    if let Some(token) = token {
      token.cancel();
    }

    let delay = *self.delay.lock().unwrap();
    let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(in_flight, Ordering::SeqCst);
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    let crash = self.crashes.lock().unwrap().contains(&workload.workload_id);
    if crash {
      panic!("driver crashed switching {}", workload.workload_id);
    }
    match self.failures.lock().unwrap().get(&key) {
      Some(err) => Err(err.clone()),
      None => Ok(json!({ "workload": workload.workload_id, "direction": direction.to_string() })),
    }
  }
}

type FailWhen = Box<dyn Fn(&Change) -> bool + Send + Sync>;

/// Wraps a memory log and refuses the first append matching a predicate,
/// and every append after it.
pub struct FailingLog {
  inner: Arc<MemoryEventLog>,
  fail_when: FailWhen,
  failed: AtomicBool,
}

impl FailingLog {
  pub fn new(
    inner: Arc<MemoryEventLog>,
    fail_when: impl Fn(&Change) -> bool + Send + Sync + 'static,
  ) -> Self {
    Self {
      inner,
      fail_when: Box::new(fail_when),
      failed: AtomicBool::new(false),
    }
  }
}

#[async_trait]
impl EventLog for FailingLog {
  async fn append(&self, event: NewEvent) -> Result<Event, Error> {
    if self.failed.load(Ordering::SeqCst) || (self.fail_when)(&event.change) {
      self.failed.store(true, Ordering::SeqCst);
      return Err(Error::Unavailable("disk full".to_string()));
    }
    self.inner.append(event).await
  }

  async fn read_after(&self, sequence: u64) -> Result<Vec<Event>, Error> {
    self.inner.read_after(sequence).await
  }

  async fn last_sequence(&self) -> Result<u64, Error> {
    self.inner.last_sequence().await
  }
}

pub struct Harness {
  pub orchestrator: Orchestrator,
  pub log: Arc<MemoryEventLog>,
  pub probe: Arc<ScriptedProbe>,
  pub driver: Arc<ScriptedDriver>,
  pub clock: Arc<ManualClock>,
}

impl Harness {
  pub async fn new(config: OrchestratorConfig) -> Self {
    let log = Arc::new(MemoryEventLog::new());
    Self::with_log(config, log.clone(), log).await
  }

  /// Open over `log`, keeping `memory` as the durable contents for reopening.
  pub async fn with_log(
    config: OrchestratorConfig,
    log: Arc<dyn EventLog>,
    memory: Arc<MemoryEventLog>,
  ) -> Self {
    let probe = Arc::new(ScriptedProbe::default());
    let driver = Arc::new(ScriptedDriver::default());
    let clock = Arc::new(ManualClock::new(start()));
    let orchestrator = Orchestrator::open(
      config,
      Collaborators::new(log, driver.clone(), probe.clone()).with_clock(clock.clone()),
    )
    .await
    .unwrap();

    Self {
      orchestrator,
      log: memory,
      probe,
      driver,
      clock,
    }
  }

  /// Load `workloads`, begin, and enter the pilot phase.
  pub async fn piloting(config: OrchestratorConfig, workloads: Vec<Workload>) -> Self {
    let harness = Self::new(config).await;
    harness.load_and_pilot(workloads).await;
    harness
  }

  pub async fn load_and_pilot(&self, workloads: Vec<Workload>) {
    self
      .orchestrator
      .load_inventory(&StaticInventory::new(workloads))
      .await
      .unwrap();
    assert_eq!(self.orchestrator.begin().await.unwrap(), Phase::Prep);
    assert_eq!(self.orchestrator.advance_phase().await.unwrap(), Phase::Pilot);
  }

  /// A second orchestrator over the same durable events.
  pub async fn reopen(&self, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::open(
      config,
      Collaborators::new(self.log.clone(), self.driver.clone(), self.probe.clone())
        .with_clock(self.clock.clone()),
    )
    .await
    .unwrap()
  }

  pub async fn events(&self) -> Vec<Event> {
    self.log.events().await
  }

  /// Sequence of the first event for `entity_id` matching `pred`.
  pub async fn first(&self, entity_id: &str, pred: impl Fn(&Change) -> bool) -> Option<u64> {
    self
      .events()
      .await
      .into_iter()
      .find(|e| e.entity_id == entity_id && pred(&e.change))
      .map(|e| e.sequence)
  }
}
