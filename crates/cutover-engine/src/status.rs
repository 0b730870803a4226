//! Status reporting.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use cutover_config::Phase;
use cutover_model::{AttachmentSide, RollbackDecision, RollbackScope, WorkloadId, WorkloadState};
use serde::Serialize;

use crate::error::OrchestratorError;
use crate::state::{Issue, MigrationState, WorkloadRecord};

/// What a status query covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusScope {
  All,
  Phase { phase: Phase },
  Workload { workload_id: WorkloadId },
  Batch { phase: Phase, index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadStatus {
  pub workload_id: WorkloadId,
  pub tier: String,
  pub phase: Phase,
  pub batch: Option<usize>,
  pub state: WorkloadState,
  pub attempt: u32,
  pub attached: AttachmentSide,
  pub excluded: bool,
  pub awaiting_decision: bool,
  pub needs_reconciliation: bool,
  pub last_error: Option<String>,
}

impl WorkloadStatus {
  fn from_record(record: &WorkloadRecord, view: &MigrationState) -> Self {
    Self {
      workload_id: record.id().to_string(),
      tier: record.workload.tier.clone(),
      phase: record.workload.phase,
      batch: view
        .plans
        .get(&record.workload.phase)
        .and_then(|plan| plan.batch_of(record.id())),
      state: record.state,
      attempt: record.attempt,
      attached: record.attached,
      excluded: record.excluded,
      awaiting_decision: record.awaiting_decision,
      needs_reconciliation: record.is_unsettled(),
      last_error: record.last_error.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
  pub generated_at: DateTime<Utc>,
  pub scope: StatusScope,
  pub current_phase: Option<Phase>,
  pub phase_entered_at: Option<DateTime<Utc>>,
  pub halted: bool,
  pub last_sequence: u64,
  pub counts: BTreeMap<WorkloadState, usize>,
  pub workloads: Vec<WorkloadStatus>,
  pub issues: Vec<Issue>,
  pub decisions: Vec<RollbackDecision>,
}

impl StatusReport {
  pub(crate) fn build(
    view: &MigrationState,
    scope: StatusScope,
    halted: bool,
    now: DateTime<Utc>,
  ) -> Result<Self, OrchestratorError> {
    let ids: Option<BTreeSet<&str>> = match &scope {
      StatusScope::All => None,
      StatusScope::Phase { phase } => Some(view.scheduled_in(*phase).map(|r| r.id()).collect()),
      StatusScope::Workload { workload_id } => {
        if view.workload(workload_id).is_none() {
          return Err(OrchestratorError::UnknownWorkload(workload_id.clone()));
        }
        Some(BTreeSet::from([workload_id.as_str()]))
      }
      StatusScope::Batch { phase, index } => {
        let batch = view
          .plans
          .get(phase)
          .and_then(|plan| plan.batch(*index))
          .ok_or(OrchestratorError::UnknownBatch {
            phase: *phase,
            index: *index,
          })?;
        Some(batch.workloads.iter().map(String::as_str).collect())
      }
    };
    let in_scope = |id: &str| ids.as_ref().is_none_or(|ids| ids.contains(id));

    let workloads: Vec<WorkloadStatus> = view
      .workloads
      .values()
      .filter(|record| in_scope(record.id()))
      .map(|record| WorkloadStatus::from_record(record, view))
      .collect();

    let mut counts: BTreeMap<WorkloadState, usize> =
      WorkloadState::ALL.into_iter().map(|s| (s, 0)).collect();
    for workload in &workloads {
      *counts.entry(workload.state).or_default() += 1;
    }

    let issues = view
      .issues
      .iter()
      .filter(|issue| ids.is_none() || in_scope(issue.entity_id.as_str()))
      .cloned()
      .collect();

    let decisions = view
      .decisions
      .iter()
      .filter(|decision| {
        ids.is_none()
          || matches!(&decision.scope, RollbackScope::Single { workload_id } if in_scope(workload_id.as_str()))
          || decision.affected.iter().any(|id| in_scope(id.as_str()))
      })
      .cloned()
      .collect();

    Ok(Self {
      generated_at: now,
      scope,
      current_phase: view.current_phase(),
      phase_entered_at: view.current_phase_record().map(|p| p.entered_at),
      halted,
      last_sequence: view.last_sequence,
      counts,
      workloads,
      issues,
      decisions,
    })
  }

  pub fn count(&self, state: WorkloadState) -> usize {
    self.counts.get(&state).copied().unwrap_or(0)
  }

  /// Render the report as a Markdown document.
  pub fn to_markdown(&self) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Migration Status Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "**Generated:** {}", self.generated_at.to_rfc3339());
    match (self.current_phase, self.phase_entered_at) {
      (Some(phase), Some(entered)) => {
        let _ = writeln!(
          out,
          "**Phase:** {phase} (entered {})",
          entered.to_rfc3339()
        );
      }
      _ => {
        let _ = writeln!(out, "**Phase:** not begun");
      }
    }
    if self.halted {
      let _ = writeln!(out, "**Orchestrator halted:** audit log write failed");
    }
    let _ = writeln!(out, "**Audit sequence:** {}", self.last_sequence);
    let _ = writeln!(out);

    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "| State | Count |");
    let _ = writeln!(out, "|-------|-------|");
    for (state, count) in &self.counts {
      let _ = writeln!(out, "| {state} | {count} |");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Workloads");
    let _ = writeln!(out);
    if self.workloads.is_empty() {
      let _ = writeln!(out, "No workloads in scope.");
    } else {
      let _ = writeln!(out, "| Workload | Tier | Phase | Batch | State | Attempt | Attached | Notes |");
      let _ = writeln!(out, "|----------|------|-------|-------|-------|---------|----------|-------|");
      for w in &self.workloads {
        let batch = w.batch.map_or("-".to_string(), |b| b.to_string());
        let attached = match w.attached {
          AttachmentSide::Source => "source",
          AttachmentSide::Target => "target",
          AttachmentSide::Unknown => "unknown",
        };
        let mut notes = Vec::new();
        if w.excluded {
          notes.push("excluded".to_string());
        }
        if w.awaiting_decision {
          notes.push("awaiting decision".to_string());
        }
        if w.needs_reconciliation {
          notes.push("needs reconciliation".to_string());
        }
        if let Some(error) = &w.last_error {
          notes.push(error.replace('|', "/"));
        }
        let _ = writeln!(
          out,
          "| {} | {} | {} | {} | {} | {} | {} | {} |",
          w.workload_id,
          w.tier,
          w.phase,
          batch,
          w.state,
          w.attempt,
          attached,
          notes.join("; ")
        );
      }
    }
    let _ = writeln!(out);

    if !self.issues.is_empty() {
      let _ = writeln!(out, "## Open Issues");
      let _ = writeln!(out);
      for issue in &self.issues {
        let _ = writeln!(
          out,
          "- [{}] `{}` {}: {}",
          issue.sequence, issue.entity_id, issue.kind, issue.message
        );
      }
      let _ = writeln!(out);
    }

    if !self.decisions.is_empty() {
      let _ = writeln!(out, "## Rollback Decisions");
      let _ = writeln!(out);
      for d in &self.decisions {
        let _ = writeln!(
          out,
          "- **{}** {} by {} in {} after {}h (requires {}{}): {}",
          d.outcome,
          d.scope,
          d.requested_by,
          d.phase,
          d.elapsed_secs / 3600,
          d.required,
          if d.window_expired { ", window expired" } else { "" },
          d.reason
        );
        if !d.affected.is_empty() {
          let _ = writeln!(out, "  - affected: {}", d.affected.join(", "));
        }
      }
    }

    out
  }
}
