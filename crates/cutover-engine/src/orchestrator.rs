//! The orchestrator loop.
//!
//! Every mutation follows the same path: check guards against the current
//! view, append an event to the audit log, then fold the event into the view.
//! A single writer lock serializes append-then-apply; readers take a
//! consistent snapshot through the view's `RwLock`. Each workload also has
//! its own lock, held while a transition step runs against it. Locks are
//! always taken workload first, writer second.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use cutover_config::{ActorClass, OrchestratorConfig, Phase, TransitionKind};
use cutover_gate::{GateResult, GateStage, GateTarget, Probe, ValidationGate};
use cutover_model::{
  AttachmentSide, Clock, Direction, Plan, Planner, RollbackDecision, RollbackOutcome,
  RollbackScope, SystemClock, Workload, WorkloadId, WorkloadState,
};
use cutover_store::{Change, Event, EventLog, NewEvent};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::driver::{AttachmentDriver, DriverError, InventoryError, InventoryProvider};
use crate::error::{ErrorKind, OrchestratorError, PhaseError};
use crate::notifier::{NoopNotifier, Notifier};
use crate::state::{MigrationState, WorkloadRecord};
use crate::status::{StatusReport, StatusScope};
use crate::{rollback, workload};

/// External capabilities the orchestrator drives.
pub struct Collaborators {
  pub log: Arc<dyn EventLog>,
  pub driver: Arc<dyn AttachmentDriver>,
  pub probe: Arc<dyn Probe>,
  pub notifier: Arc<dyn Notifier>,
  pub clock: Arc<dyn Clock>,
}

impl Collaborators {
  /// Collaborators with a no-op notifier and the system clock.
  pub fn new(
    log: Arc<dyn EventLog>,
    driver: Arc<dyn AttachmentDriver>,
    probe: Arc<dyn Probe>,
  ) -> Self {
    Self {
      log,
      driver,
      probe,
      notifier: Arc::new(NoopNotifier),
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }
}

/// Where a workload ended up after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadOutcome {
  Committed,
  RolledBack,
  /// Failed and waiting for an operator's rollback decision.
  AwaitingDecision,
  /// A guard refused to move it, e.g. a predecessor is not committed.
  Blocked,
  Excluded,
  /// The run was cancelled before its next step started.
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
  pub run_id: String,
  pub phase: Phase,
  pub batches_run: usize,
  pub outcomes: BTreeMap<WorkloadId, WorkloadOutcome>,
  pub cancelled: bool,
}

impl RunReport {
  /// Workloads that ended with `outcome`, in id order.
  pub fn with_outcome(&self, outcome: WorkloadOutcome) -> Vec<&str> {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| **o == outcome)
      .map(|(id, _)| id.as_str())
      .collect()
  }
}

enum Progress {
  Done(WorkloadOutcome),
  Failed { kind: ErrorKind, reason: String },
}

/// Exclusive claim on runs and phase changes.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Result<Self, OrchestratorError> {
    flag
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .map_err(|_| OrchestratorError::RunInProgress)?;
    Ok(Self(flag))
  }
}

impl Drop for RunGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

fn phase_entity(phase: Phase) -> String {
  format!("phase:{phase}")
}

struct Inner {
  config: OrchestratorConfig,
  log: Arc<dyn EventLog>,
  driver: Arc<dyn AttachmentDriver>,
  notifier: Arc<dyn Notifier>,
  clock: Arc<dyn Clock>,
  gate: ValidationGate,
  view: RwLock<MigrationState>,
  writer: Mutex<()>,
  locks: StdMutex<HashMap<WorkloadId, Arc<Mutex<()>>>>,
  running: AtomicBool,
  halted: AtomicBool,
}

/// Drives a migration program. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
  inner: Arc<Inner>,
}

impl Orchestrator {
  /// Open an orchestrator over `collaborators.log`, replaying every event to
  /// rebuild the in-memory view.
  pub async fn open(
    config: OrchestratorConfig,
    collaborators: Collaborators,
  ) -> Result<Self, OrchestratorError> {
    config.validate()?;

    let events = collaborators.log.read_after(0).await?;
    let view = MigrationState::replay(&events);
    let unsettled = view
      .workloads
      .values()
      .filter(|record| record.is_unsettled())
      .count();

    info!(
      events = events.len(),
      last_sequence = view.last_sequence,
      phase = ?view.current_phase(),
      unsettled,
      "orchestrator_opened"
    );

    let gate = ValidationGate::new(
      collaborators.probe,
      config.gate.clone(),
      collaborators.clock.clone(),
    );

    Ok(Self {
      inner: Arc::new(Inner {
        config,
        log: collaborators.log,
        driver: collaborators.driver,
        notifier: collaborators.notifier,
        clock: collaborators.clock,
        gate,
        view: RwLock::new(view),
        writer: Mutex::new(()),
        locks: StdMutex::new(HashMap::new()),
        running: AtomicBool::new(false),
        halted: AtomicBool::new(false),
      }),
    })
  }

  pub fn config(&self) -> &OrchestratorConfig {
    &self.inner.config
  }

  /// Set once an audit log write fails; every later mutation is refused.
  pub fn is_halted(&self) -> bool {
    self.inner.halted.load(Ordering::SeqCst)
  }

  /// A consistent copy of the materialized view.
  pub async fn snapshot(&self) -> MigrationState {
    self.inner.view.read().await.clone()
  }

  pub async fn status(&self, scope: StatusScope) -> Result<StatusReport, OrchestratorError> {
    let view = self.inner.view.read().await;
    StatusReport::build(&view, scope, self.is_halted(), self.inner.clock.now())
  }

  /// Register every workload the provider returns that is not yet known.
  ///
  /// Returns the number of newly registered workloads. Structural problems
  /// such as unknown dependencies or cycles surface when a phase is planned.
  pub async fn load_inventory(
    &self,
    provider: &dyn InventoryProvider,
  ) -> Result<usize, OrchestratorError> {
    self.ensure_live()?;
    let incoming = provider.workloads().await?;

    let writer = self.inner.writer.lock().await;
    let (mut fresh, total) = {
      let view = self.inner.view.read().await;
      let mut fresh: Vec<Workload> = Vec::new();
      let mut seen = BTreeSet::new();

      for workload in incoming {
        if !seen.insert(workload.workload_id.clone()) {
          return Err(
            InventoryError::Invalid(format!("duplicate workload id: {}", workload.workload_id))
              .into(),
          );
        }
        match view.workload(&workload.workload_id) {
          Some(existing) if existing.workload == workload => continue,
          Some(_) => {
            return Err(
              InventoryError::Invalid(format!(
                "workload '{}' is already registered with a different descriptor",
                workload.workload_id
              ))
              .into(),
            );
          }
          None => fresh.push(workload),
        }
      }

      (fresh, view.workloads.len())
    };

    if let Some(workload) = fresh.iter().find(|w| {
      !self
        .inner
        .config
        .phase_policy(w.phase)
        .permits(TransitionKind::Commit)
    }) {
      return Err(
        InventoryError::Invalid(format!(
          "workload '{}' is scheduled in {}, which permits no commits",
          workload.workload_id, workload.phase
        ))
        .into(),
      );
    }

    fresh.sort_by(|a, b| a.workload_id.cmp(&b.workload_id));
    let registered = fresh.len();
    for workload in fresh {
      let workload_id = workload.workload_id.clone();
      self
        .append(
          &writer,
          &workload_id,
          Change::WorkloadRegistered { workload },
          "inventory loaded".to_string(),
        )
        .await?;
    }

    info!(registered, total = total + registered, "inventory_loaded");
    Ok(registered)
  }

  /// Enter the first phase.
  pub async fn begin(&self) -> Result<Phase, OrchestratorError> {
    self.ensure_live()?;
    let writer = self.inner.writer.lock().await;
    let first = crate::phase::check_begin(&*self.inner.view.read().await)?;

    self
      .append(
        &writer,
        &phase_entity(first),
        Change::PhaseEntered {
          from: None,
          to: first,
        },
        "migration begun".to_string(),
      )
      .await?;

    info!(phase = %first, "phase_entered");
    Ok(first)
  }

  /// Move to the next phase once the current one is done.
  ///
  /// Fails while a run is in flight, while any workload scheduled in the
  /// current phase is neither committed nor excluded, or when the next
  /// phase's entry checks fail.
  #[instrument(name = "orchestrator_advance_phase", skip(self))]
  pub async fn advance_phase(&self) -> Result<Phase, OrchestratorError> {
    self.ensure_live()?;
    let _barrier = RunGuard::acquire(&self.inner.running)?;

    let checked = crate::phase::check_advance(&*self.inner.view.read().await);
    let (current, next) = match checked {
      Ok(pair) => pair,
      Err(err) => {
        if let PhaseError::ScheduledPending { current, .. } = &err
          && let Some(to) = current.next()
        {
          self
            .record(
              &phase_entity(to),
              Change::PhaseRejected {
                from: Some(*current),
                to,
                reason: err.to_string(),
              },
              "phase advance requested",
            )
            .await?;
        }
        warn!(error = %err, "phase_advance_rejected");
        return Err(err.into());
      }
    };

    let entry_checks = self.inner.config.phase_policy(next).entry_checks;
    if !entry_checks.is_empty() {
      let result = self
        .inner
        .gate
        .run_stage(&GateTarget::phase(next), GateStage::PhaseEntry, &entry_checks)
        .await;
      let passed = result.passed();
      let failing = result.failing.clone();
      self
        .record(
          &phase_entity(next),
          Change::GateRecorded { result },
          "phase entry checks",
        )
        .await?;

      if !passed {
        let err = PhaseError::EntryChecksFailed {
          phase: next,
          failing,
        };
        self
          .record(
            &phase_entity(next),
            Change::PhaseRejected {
              from: Some(current),
              to: next,
              reason: err.to_string(),
            },
            "phase entry checks failed",
          )
          .await?;
        warn!(phase = %next, error = %err, "phase_advance_rejected");
        return Err(err.into());
      }
    }

    let writer = self.inner.writer.lock().await;
    let (current, next) = crate::phase::check_advance(&*self.inner.view.read().await)?;
    self
      .append(
        &writer,
        &phase_entity(next),
        Change::PhaseEntered {
          from: Some(current),
          to: next,
        },
        "phase advanced".to_string(),
      )
      .await?;

    info!(from = %current, phase = %next, "phase_entered");
    if next.is_point_of_no_return() {
      warn!(phase = %next, "point_of_no_return_entered");
    }
    Ok(next)
  }

  /// Take a workload out of its phase so it no longer blocks phase exit.
  pub async fn exclude(&self, workload_id: &str, reason: &str) -> Result<(), OrchestratorError> {
    self.ensure_live()?;
    let _guard = self.lock_workload(workload_id).await;
    let writer = self.inner.writer.lock().await;

    let state = {
      let view = self.inner.view.read().await;
      let record = view
        .workload(workload_id)
        .ok_or_else(|| OrchestratorError::UnknownWorkload(workload_id.to_string()))?;
      if record.excluded {
        return Ok(());
      }
      record.state
    };

    if !matches!(
      state,
      WorkloadState::NotStarted | WorkloadState::Prepared | WorkloadState::RolledBack
    ) {
      return Err(OrchestratorError::NotExcludable {
        workload_id: workload_id.to_string(),
        state,
      });
    }

    self
      .append(
        &writer,
        workload_id,
        Change::WorkloadExcluded {
          reason: reason.to_string(),
        },
        reason.to_string(),
      )
      .await?;

    info!(workload_id, reason, "workload_excluded");
    Ok(())
  }

  /// The batch plan for `phase`.
  ///
  /// The first successful plan is recorded and returned unchanged by every
  /// later call. Cycles, unknown dependencies and cross-phase conflicts fail
  /// the whole call and record nothing but an issue.
  pub async fn plan(&self, phase: Phase) -> Result<Plan, OrchestratorError> {
    self.ensure_live()?;
    let writer = self.inner.writer.lock().await;

    let (inventory, excluded) = {
      let view = self.inner.view.read().await;
      if let Some(plan) = view.plans.get(&phase) {
        return Ok(plan.clone());
      }
      (view.inventory(), view.excluded())
    };

    let plan = match Planner::new(self.inner.config.max_batch_size).plan(phase, &inventory, &excluded)
    {
      Ok(plan) => plan,
      Err(err) => {
        let err = OrchestratorError::from(err);
        error!(phase = %phase, error = %err, "plan_failed");
        self
          .append(
            &writer,
            &phase_entity(phase),
            Change::IssueRaised {
              kind: err.kind().as_str().to_string(),
              message: err.to_string(),
            },
            "planning failed".to_string(),
          )
          .await?;
        return Err(err);
      }
    };

    self
      .append(
        &writer,
        &phase_entity(phase),
        Change::PlanRecorded { plan: plan.clone() },
        "batches planned".to_string(),
      )
      .await?;

    info!(
      phase = %phase,
      batches = plan.batches.len(),
      workloads = plan.workload_ids().count(),
      "plan_recorded"
    );
    Ok(plan)
  }

  /// Drive every batch of `phase` in order, at most `concurrency` workloads
  /// at a time within a batch.
  ///
  /// Cancellation stops new steps from starting; a workload whose switch has
  /// begun is carried to a stable state first. A persistence failure halts
  /// the run and the orchestrator.
  #[instrument(name = "orchestrator_run", skip(self, phase, cancel), fields(phase = %phase))]
  pub async fn run(
    &self,
    phase: Phase,
    concurrency: usize,
    cancel: CancellationToken,
  ) -> Result<RunReport, OrchestratorError> {
    self.ensure_live()?;
    let _running = RunGuard::acquire(&self.inner.running)?;
    crate::phase::check_active(&*self.inner.view.read().await, phase)?;

    let plan = self.plan(phase).await?;
    let concurrency = concurrency.max(1);
    let mut report = RunReport {
      run_id: Uuid::new_v4().to_string(),
      phase,
      batches_run: 0,
      outcomes: BTreeMap::new(),
      cancelled: false,
    };

    info!(
      run_id = %report.run_id,
      phase = %phase,
      batches = plan.batches.len(),
      concurrency,
      "run_started"
    );

    if self.inner.config.retry_rolled_back {
      self.reset_rolled_back(&plan).await?;
    }

    for batch in &plan.batches {
      if cancel.is_cancelled() {
        warn!(run_id = %report.run_id, batch = batch.index, "run_cancelled");
        break;
      }

      info!(
        run_id = %report.run_id,
        phase = %phase,
        batch = batch.index,
        workloads = ?batch.workloads,
        "batch_started"
      );

      let semaphore = Arc::new(Semaphore::new(concurrency));
      let handles: Vec<_> = batch
        .workloads
        .iter()
        .cloned()
        .map(|workload_id| {
          let this = self.clone();
          let semaphore = semaphore.clone();
          let cancel = cancel.clone();
          tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            this.process_workload(&workload_id, &cancel).await
          })
        })
        .collect();

      let mut fatal = None;
      let joined = join_all(handles).await;
      for (workload_id, result) in batch.workloads.iter().cloned().zip(joined) {
        match result {
          Ok(Ok(outcome)) => {
            report.outcomes.insert(workload_id, outcome);
          }
          Ok(Err(err)) if err.is_fatal() => {
            error!(workload_id = %workload_id, error = %err, "workload_fatal");
            fatal.get_or_insert(err);
          }
          Ok(Err(err)) => {
            warn!(workload_id = %workload_id, error = %err, "workload_blocked");
            report.outcomes.insert(workload_id, WorkloadOutcome::Blocked);
          }
          Err(e) => {
            error!(workload_id = %workload_id, error = %e, "workload_task_failed");
            let raised = self
              .record(
                &workload_id,
                Change::IssueRaised {
                  kind: ErrorKind::Internal.as_str().to_string(),
                  message: format!("workload task ended abnormally: {e}"),
                },
                "workload task failed",
              )
              .await;
            if let Err(err) = raised {
              fatal.get_or_insert(err);
            }
            report.outcomes.insert(workload_id, WorkloadOutcome::Blocked);
          }
        }
      }
      report.batches_run += 1;

      if let Some(err) = fatal {
        error!(run_id = %report.run_id, batch = batch.index, error = %err, "run_halted");
        return Err(err);
      }

      info!(run_id = %report.run_id, batch = batch.index, "batch_completed");
    }

    report.cancelled = cancel.is_cancelled();
    info!(
      run_id = %report.run_id,
      phase = %phase,
      committed = report.with_outcome(WorkloadOutcome::Committed).len(),
      rolled_back = report.with_outcome(WorkloadOutcome::RolledBack).len(),
      awaiting_decision = report.with_outcome(WorkloadOutcome::AwaitingDecision).len(),
      cancelled = report.cancelled,
      "run_completed"
    );
    Ok(report)
  }

  /// Request a rollback decided against the orchestrator clock.
  pub async fn rollback(
    &self,
    scope: RollbackScope,
    requested_by: ActorClass,
  ) -> Result<RollbackDecision, OrchestratorError> {
    self
      .request_rollback(scope, requested_by, self.inner.clock.now())
      .await
  }

  /// Decide a rollback request as of `now` and, when approved, execute it.
  ///
  /// Asking again for a scope that is already fully rolled back returns the
  /// earlier decision without recording anything.
  #[instrument(
    name = "orchestrator_rollback",
    skip_all,
    fields(scope = %scope, requested_by = %requested_by)
  )]
  pub async fn request_rollback(
    &self,
    scope: RollbackScope,
    requested_by: ActorClass,
    now: DateTime<Utc>,
  ) -> Result<RollbackDecision, OrchestratorError> {
    self.ensure_live()?;

    let decision = {
      let writer = self.inner.writer.lock().await;
      let decision = {
        let view = self.inner.view.read().await;
        if let Some(previous) = rollback::previous_decision(&view, &scope, now) {
          info!(decision_id = %previous.decision_id, "rollback_already_done");
          return Ok(previous.clone());
        }
        rollback::decide(
          &view,
          &self.inner.config,
          &scope,
          requested_by,
          now,
          Uuid::new_v4().to_string(),
        )?
      };

      self
        .append(
          &writer,
          &format!("rollback:{}", decision.decision_id),
          Change::RollbackDecided {
            decision: decision.clone(),
          },
          decision.reason.clone(),
        )
        .await?;
      decision
    };

    info!(
      decision_id = %decision.decision_id,
      outcome = %decision.outcome,
      required = %decision.required,
      window_expired = decision.window_expired,
      affected = ?decision.affected,
      "rollback_decided"
    );

    if decision.is_approved() {
      self.execute_rollback(&decision).await?;
    }
    Ok(decision)
  }

  fn ensure_live(&self) -> Result<(), OrchestratorError> {
    if self.is_halted() {
      Err(OrchestratorError::Halted)
    } else {
      Ok(())
    }
  }

  async fn record(
    &self,
    entity_id: &str,
    change: Change,
    cause: impl Into<String>,
  ) -> Result<Event, OrchestratorError> {
    let writer = self.inner.writer.lock().await;
    self.append(&writer, entity_id, change, cause.into()).await
  }

  /// Append then apply. The caller holds the writer lock.
  async fn append(
    &self,
    _writer: &MutexGuard<'_, ()>,
    entity_id: &str,
    change: Change,
    cause: String,
  ) -> Result<Event, OrchestratorError> {
    self.ensure_live()?;

    let new_event = NewEvent::new(self.inner.clock.now(), entity_id, change, cause);
    let event = match self.inner.log.append(new_event).await {
      Ok(event) => event,
      Err(e) => {
        self.inner.halted.store(true, Ordering::SeqCst);
        error!(entity_id, error = %e, "orchestrator_halted");
        return Err(e.into());
      }
    };

    self.inner.view.write().await.apply(&event);
    debug!(
      sequence = event.sequence,
      entity_id,
      change = event.change.name(),
      "event_recorded"
    );
    self.inner.notifier.notify(event.clone());
    Ok(event)
  }

  async fn lock_workload(&self, workload_id: &str) -> OwnedMutexGuard<()> {
    let lock = {
      let mut locks = self.inner.locks.lock().unwrap_or_else(|e| e.into_inner());
      locks.entry(workload_id.to_string()).or_default().clone()
    };
    lock.lock_owned().await
  }

  async fn record_of(&self, workload_id: &str) -> Result<WorkloadRecord, OrchestratorError> {
    self
      .inner
      .view
      .read()
      .await
      .workload(workload_id)
      .cloned()
      .ok_or_else(|| OrchestratorError::UnknownWorkload(workload_id.to_string()))
  }

  /// Check and record one workload transition, or record its rejection.
  async fn transition(
    &self,
    workload_id: &str,
    kind: TransitionKind,
    cause: &str,
  ) -> Result<WorkloadState, OrchestratorError> {
    let writer = self.inner.writer.lock().await;

    let checked = {
      let view = self.inner.view.read().await;
      let record = view
        .workload(workload_id)
        .ok_or_else(|| OrchestratorError::UnknownWorkload(workload_id.to_string()))?;
      let from = record.state;
      workload::check_transition(&view, &self.inner.config, record, kind)
        .map(|to| (from, to))
        .map_err(|err| (from, err))
    };

    match checked {
      Ok((from, to)) => {
        self
          .append(
            &writer,
            workload_id,
            Change::WorkloadTransition { kind, from, to },
            cause.to_string(),
          )
          .await?;
        info!(workload_id, %kind, %from, %to, "workload_transition");
        Ok(to)
      }
      Err((from, err)) => {
        self
          .append(
            &writer,
            workload_id,
            Change::TransitionRejected {
              kind,
              from,
              reason: err.to_string(),
            },
            cause.to_string(),
          )
          .await?;
        warn!(workload_id, %kind, error = %err, "transition_rejected");
        Err(err.into())
      }
    }
  }

  /// Like [`Self::transition`], but a guard refusal is reported as `false`.
  async fn try_transition(
    &self,
    workload_id: &str,
    kind: TransitionKind,
    cause: &str,
  ) -> Result<bool, OrchestratorError> {
    match self.transition(workload_id, kind, cause).await {
      Ok(_) => Ok(true),
      Err(OrchestratorError::Transition(_)) => Ok(false),
      Err(e) => Err(e),
    }
  }

  async fn reset_rolled_back(&self, plan: &Plan) -> Result<(), OrchestratorError> {
    for workload_id in plan.workload_ids() {
      let record = self.record_of(workload_id).await?;
      if record.state != WorkloadState::RolledBack || record.excluded || record.awaiting_decision {
        continue;
      }

      let _guard = self.lock_workload(workload_id).await;
      if self
        .try_transition(workload_id, TransitionKind::Reset, "retrying rolled-back workload")
        .await?
      {
        info!(workload_id = %workload_id, attempt = record.attempt + 1, "workload_reset");
      }
    }
    Ok(())
  }

  async fn process_workload(
    &self,
    workload_id: &str,
    cancel: &CancellationToken,
  ) -> Result<WorkloadOutcome, OrchestratorError> {
    let (kind, reason) = {
      let _guard = self.lock_workload(workload_id).await;
      match self.advance_workload(workload_id, cancel).await? {
        Progress::Done(outcome) => return Ok(outcome),
        Progress::Failed { kind, reason } => (kind, reason),
      }
    };

    self.handle_failure(workload_id, kind, reason).await
  }

  /// Step a workload forward until it is committed, fails, or has to stop.
  async fn advance_workload(
    &self,
    workload_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Progress, OrchestratorError> {
    loop {
      let record = self.record_of(workload_id).await?;

      if record.excluded {
        return Ok(Progress::Done(WorkloadOutcome::Excluded));
      }
      if record.awaiting_decision {
        return Ok(Progress::Done(WorkloadOutcome::AwaitingDecision));
      }
      if record.is_unsettled() {
        if self.reconcile(&record.workload).await? != AttachmentSide::Unknown {
          continue;
        }
        if !record.rollback_approved {
          return Ok(Progress::Failed {
            kind: ErrorKind::AttachmentDriver,
            reason: "attachment could not be reconciled".to_string(),
          });
        }
      }
      if record.rollback_approved {
        return self.resume_rollback(workload_id).await;
      }

      match record.state {
        WorkloadState::Committed => return Ok(Progress::Done(WorkloadOutcome::Committed)),
        WorkloadState::RolledBack => return Ok(Progress::Done(WorkloadOutcome::RolledBack)),
        WorkloadState::NotStarted => {
          if cancel.is_cancelled() {
            return Ok(Progress::Done(WorkloadOutcome::Cancelled));
          }
          if !self
            .try_transition(workload_id, TransitionKind::Prepare, "dispatched in batch")
            .await?
          {
            return Ok(Progress::Done(WorkloadOutcome::Blocked));
          }
        }
        WorkloadState::Prepared => {
          let result = self
            .gate_workload(
              &record.workload,
              GateStage::PreCutover,
              &self.inner.config.checks.pre_cutover,
            )
            .await?;
          if !result.passed() {
            return Ok(validation_failed(workload_id, &result));
          }
          if cancel.is_cancelled() {
            return Ok(Progress::Done(WorkloadOutcome::Cancelled));
          }
          if !self
            .try_transition(workload_id, TransitionKind::Cutover, "pre-cutover checks passed")
            .await?
          {
            return Ok(Progress::Done(WorkloadOutcome::Blocked));
          }
          if let Some(failed) = self.forward_switch(&record.workload).await? {
            return Ok(failed);
          }
        }
        WorkloadState::CutoverInProgress => match record.attached {
          AttachmentSide::Target => {
            if !self
              .try_transition(workload_id, TransitionKind::Validate, "attached to target")
              .await?
            {
              return Ok(Progress::Done(WorkloadOutcome::Blocked));
            }
          }
          // Cut over before the switch was ever requested.
          AttachmentSide::Source => {
            if let Some(failed) = self.forward_switch(&record.workload).await? {
              return Ok(failed);
            }
          }
          AttachmentSide::Unknown => {
            return Ok(Progress::Failed {
              kind: ErrorKind::AttachmentDriver,
              reason: "attachment unknown".to_string(),
            });
          }
        },
        WorkloadState::PostValidating => {
          let result = self
            .gate_workload(
              &record.workload,
              GateStage::PostCutover,
              &self.inner.config.checks.post_cutover,
            )
            .await?;
          if !result.passed() {
            return Ok(validation_failed(workload_id, &result));
          }
          if !self
            .try_transition(workload_id, TransitionKind::Commit, "post-cutover checks passed")
            .await?
          {
            return Ok(Progress::Done(WorkloadOutcome::Blocked));
          }
          info!(workload_id, attempt = record.attempt, "workload_committed");
        }
      }
    }
  }

  /// Finish an approved rollback that stopped before reaching this workload,
  /// e.g. after a restart. The caller holds the workload lock.
  async fn resume_rollback(&self, workload_id: &str) -> Result<Progress, OrchestratorError> {
    info!(workload_id, "rollback_resumed");
    let cause = "approved rollback resumed";
    if self.roll_back_workload(workload_id, cause).await? {
      return Ok(Progress::Done(WorkloadOutcome::RolledBack));
    }

    self.rollback_incomplete(workload_id, cause).await?;
    let record = self.record_of(workload_id).await?;
    Ok(Progress::Done(if record.awaiting_decision {
      WorkloadOutcome::AwaitingDecision
    } else {
      WorkloadOutcome::Blocked
    }))
  }

  /// Switch forward; `Some` carries the failure when the workload did not
  /// end up on its target.
  async fn forward_switch(&self, workload: &Workload) -> Result<Option<Progress>, OrchestratorError> {
    match self.switch(workload, Direction::Forward).await? {
      AttachmentSide::Target => Ok(None),
      side => Ok(Some(Progress::Failed {
        kind: ErrorKind::AttachmentDriver,
        reason: format!("forward switch left the workload on {side:?}").to_lowercase(),
      })),
    }
  }

  async fn gate_workload(
    &self,
    workload: &Workload,
    stage: GateStage,
    checks: &[String],
  ) -> Result<GateResult, OrchestratorError> {
    let result = self
      .inner
      .gate
      .run_stage(&GateTarget::workload(workload.clone()), stage, checks)
      .await;
    self
      .record(
        &workload.workload_id,
        Change::GateRecorded {
          result: result.clone(),
        },
        format!("{stage} gate"),
      )
      .await?;

    // Timed-out checks already count as failures; surface them separately.
    let timed_out: Vec<&str> = result
      .checks
      .iter()
      .filter(|check| check.timed_out)
      .map(|check| check.check_id.as_str())
      .collect();
    if !timed_out.is_empty() {
      warn!(workload_id = %workload.workload_id, %stage, checks = ?timed_out, "probe_timeout");
      self
        .record(
          &workload.workload_id,
          Change::IssueRaised {
            kind: ErrorKind::ProbeTimeout.as_str().to_string(),
            message: format!(
              "{stage} checks timed out after retries: {}",
              timed_out.join(", ")
            ),
          },
          format!("{stage} gate"),
        )
        .await?;
    }
    Ok(result)
  }

  /// Call the attachment driver, recording the request before and the
  /// outcome after. A driver error or timeout leads to reconciliation.
  async fn switch(
    &self,
    workload: &Workload,
    direction: Direction,
  ) -> Result<AttachmentSide, OrchestratorError> {
    let workload_id = workload.workload_id.as_str();
    self
      .record(
        workload_id,
        Change::SwitchRequested { direction },
        format!("{direction} switch requested"),
      )
      .await?;

    let timeout = self.inner.config.driver_timeout();
    let outcome = match tokio::time::timeout(timeout, self.inner.driver.switch(workload, direction)).await
    {
      Ok(result) => result,
      Err(_) => Err(DriverError::Timeout(timeout)),
    };

    match outcome {
      Ok(diagnostic) => {
        self
          .record(
            workload_id,
            Change::SwitchCompleted {
              direction,
              diagnostic,
            },
            format!("{direction} switch completed"),
          )
          .await?;
        info!(workload_id, %direction, "switch_completed");
        Ok(direction.destination())
      }
      Err(err) => {
        warn!(workload_id, %direction, error = %err, "switch_failed");
        self
          .record(
            workload_id,
            Change::SwitchFailed {
              direction,
              error: err.to_string(),
            },
            "attachment driver error",
          )
          .await?;
        self
          .record(
            workload_id,
            Change::IssueRaised {
              kind: ErrorKind::AttachmentDriver.as_str().to_string(),
              message: format!("{direction} switch outcome unknown: {err}"),
            },
            "attachment driver error",
          )
          .await?;
        self.reconcile(workload).await
      }
    }
  }

  /// Probe where a workload is attached. The reconcile checks passing means
  /// the target; failing means the source; no answer means unknown.
  async fn reconcile(&self, workload: &Workload) -> Result<AttachmentSide, OrchestratorError> {
    let checks = &self.inner.config.checks.reconcile;
    let result = self
      .inner
      .gate
      .run_stage(
        &GateTarget::workload(workload.clone()),
        GateStage::Reconcile,
        checks,
      )
      .await;

    let side = if checks.is_empty() || result.inconclusive() {
      AttachmentSide::Unknown
    } else if result.passed() {
      AttachmentSide::Target
    } else {
      AttachmentSide::Source
    };

    self
      .record(
        &workload.workload_id,
        Change::Reconciled { side, result },
        "attachment reconciled",
      )
      .await?;
    info!(workload_id = %workload.workload_id, side = ?side, "workload_reconciled");
    Ok(side)
  }

  /// Roll back automatically when the phase allows it; otherwise leave the
  /// workload for an operator.
  async fn handle_failure(
    &self,
    workload_id: &str,
    kind: ErrorKind,
    reason: String,
  ) -> Result<WorkloadOutcome, OrchestratorError> {
    warn!(workload_id, kind = %kind, reason, "workload_failed");
    self
      .record(
        workload_id,
        Change::IssueRaised {
          kind: kind.as_str().to_string(),
          message: reason.clone(),
        },
        "workload failed",
      )
      .await?;

    let phase = self.inner.view.read().await.current_phase();
    let automatic = phase.is_some_and(|phase| self.inner.config.phase_policy(phase).automatic_rollback);
    if !automatic {
      self
        .record(
          workload_id,
          Change::AwaitingDecision {
            reason: format!("automatic rollback disabled: {reason}"),
          },
          "escalated to operator",
        )
        .await?;
      return Ok(WorkloadOutcome::AwaitingDecision);
    }

    let decision = self
      .rollback(RollbackScope::single(workload_id), ActorClass::Automation)
      .await?;

    match decision.outcome {
      RollbackOutcome::Approved => {
        let record = self.record_of(workload_id).await?;
        if record.state == WorkloadState::RolledBack {
          Ok(WorkloadOutcome::RolledBack)
        } else {
          Ok(WorkloadOutcome::AwaitingDecision)
        }
      }
      RollbackOutcome::Escalated => {
        if decision.window_expired {
          self
            .record(
              workload_id,
              Change::IssueRaised {
                kind: ErrorKind::RollbackWindowExpired.as_str().to_string(),
                message: decision.reason.clone(),
              },
              "automatic rollback blocked",
            )
            .await?;
        }
        Ok(WorkloadOutcome::AwaitingDecision)
      }
      RollbackOutcome::Denied => {
        self
          .record(
            workload_id,
            Change::AwaitingDecision {
              reason: decision.reason.clone(),
            },
            "automatic rollback denied",
          )
          .await?;
        Ok(WorkloadOutcome::AwaitingDecision)
      }
    }
  }

  async fn execute_rollback(&self, decision: &RollbackDecision) -> Result<(), OrchestratorError> {
    let cause = format!("rollback {} of {}", decision.decision_id, decision.scope);
    for workload_id in &decision.affected {
      let _guard = self.lock_workload(workload_id).await;
      if !self.roll_back_workload(workload_id, &cause).await? {
        self.rollback_incomplete(workload_id, &cause).await?;
        return Ok(());
      }
    }
    Ok(())
  }

  async fn rollback_incomplete(&self, workload_id: &str, cause: &str) -> Result<(), OrchestratorError> {
    let record = self.record_of(workload_id).await?;
    let reason = record
      .last_error
      .unwrap_or_else(|| format!("workload is {}", record.state));
    warn!(workload_id, cause, reason, "rollback_incomplete");
    self
      .record(
        workload_id,
        Change::IssueRaised {
          kind: ErrorKind::RollbackIncomplete.as_str().to_string(),
          message: format!("{cause} stopped at '{workload_id}': {reason}"),
        },
        cause.to_string(),
      )
      .await?;
    Ok(())
  }

  /// Returns `false` when the workload could not be rolled back.
  async fn roll_back_workload(&self, workload_id: &str, cause: &str) -> Result<bool, OrchestratorError> {
    let record = self.record_of(workload_id).await?;
    if record.state == WorkloadState::RolledBack {
      return Ok(true);
    }

    let permitted = {
      let view = self.inner.view.read().await;
      workload::check_transition(&view, &self.inner.config, &record, TransitionKind::Rollback).is_ok()
    };
    if !permitted {
      return self
        .try_transition(workload_id, TransitionKind::Rollback, cause)
        .await;
    }

    if record.attached != AttachmentSide::Source || record.is_unsettled() {
      let side = self.switch(&record.workload, Direction::Rollback).await?;
      if side != AttachmentSide::Source {
        self
          .record(
            workload_id,
            Change::AwaitingDecision {
              reason: "rollback switch did not return the workload to its source".to_string(),
            },
            cause.to_string(),
          )
          .await?;
        return Ok(false);
      }
    }

    let rolled_back = self
      .try_transition(workload_id, TransitionKind::Rollback, cause)
      .await?;
    if rolled_back {
      info!(workload_id, "workload_rolled_back");
    }
    Ok(rolled_back)
  }
}

fn validation_failed(workload_id: &str, result: &GateResult) -> Progress {
  let err = OrchestratorError::ValidationFailed {
    workload_id: workload_id.to_string(),
    stage: result.stage,
    failing: result.failing.clone(),
  };
  Progress::Failed {
    kind: err.kind(),
    reason: err.to_string(),
  }
}
