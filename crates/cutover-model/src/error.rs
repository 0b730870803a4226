use cutover_config::Phase;
use thiserror::Error;

/// The dependency graph contains at least one cycle.
///
/// `remaining` lists every workload left with unresolved predecessors once
/// layering could make no more progress, in identifier order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle detected among workloads: {}", .remaining.join(", "))]
pub struct DependencyCycleError {
  pub remaining: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
  #[error(transparent)]
  DependencyCycle(#[from] DependencyCycleError),

  #[error("duplicate workload id: {workload_id}")]
  DuplicateWorkload { workload_id: String },

  #[error("workload '{workload_id}' depends on unknown workload '{dependency}'")]
  UnknownDependency {
    workload_id: String,
    dependency: String,
  },

  #[error(
    "workload '{workload_id}' ({phase}) depends on '{dependency}' scheduled in later phase {dependency_phase}"
  )]
  ScheduleConflict {
    workload_id: String,
    phase: Phase,
    dependency: String,
    dependency_phase: Phase,
  },
}
