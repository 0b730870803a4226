use std::collections::{BTreeMap, BTreeSet};

use cutover_config::Phase;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::graph::Graph;
use crate::workload::{Workload, WorkloadId};

/// A set of workloads dispatched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
  pub phase: Phase,
  /// Position within the phase's plan, starting at 0.
  pub index: usize,
  /// Sorted by id.
  pub workloads: Vec<WorkloadId>,
}

/// Ordered batches for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
  pub phase: Phase,
  pub batches: Vec<Batch>,
}

impl Plan {
  pub fn batch(&self, index: usize) -> Option<&Batch> {
    self.batches.get(index)
  }

  /// Index of the batch containing `workload_id`.
  pub fn batch_of(&self, workload_id: &str) -> Option<usize> {
    self
      .batches
      .iter()
      .find(|batch| batch.workloads.iter().any(|id| id == workload_id))
      .map(|batch| batch.index)
  }

  pub fn workload_ids(&self) -> impl Iterator<Item = &WorkloadId> {
    self.batches.iter().flat_map(|batch| batch.workloads.iter())
  }
}

/// Check an inventory for duplicate ids, dangling dependencies, cycles and
/// dependencies scheduled in a later phase than their dependent.
pub fn validate_inventory(workloads: &[Workload]) -> Result<(), PlanError> {
  let mut by_id: BTreeMap<&str, &Workload> = BTreeMap::new();
  for workload in workloads {
    if by_id.insert(&workload.workload_id, workload).is_some() {
      return Err(PlanError::DuplicateWorkload {
        workload_id: workload.workload_id.clone(),
      });
    }
  }

  for workload in by_id.values() {
    for dependency in &workload.dependencies {
      if !by_id.contains_key(dependency.as_str()) {
        return Err(PlanError::UnknownDependency {
          workload_id: workload.workload_id.clone(),
          dependency: dependency.clone(),
        });
      }
    }
  }

  Graph::from_workloads(workloads).layers()?;

  for workload in by_id.values() {
    for dependency in &workload.dependencies {
      if let Some(upstream) = by_id.get(dependency.as_str())
        && upstream.phase > workload.phase
      {
        return Err(PlanError::ScheduleConflict {
          workload_id: workload.workload_id.clone(),
          phase: workload.phase,
          dependency: dependency.clone(),
          dependency_phase: upstream.phase,
        });
      }
    }
  }

  Ok(())
}

/// Splits a phase's workloads into dependency-ordered batches.
#[derive(Debug, Clone, Copy)]
pub struct Planner {
  max_batch_size: usize,
}

impl Planner {
  pub fn new(max_batch_size: usize) -> Self {
    Self {
      max_batch_size: max_batch_size.max(1),
    }
  }

  /// Plan `phase` over the whole inventory.
  ///
  /// Workloads scheduled for `phase` and not in `excluded` are layered by
  /// dependency; each layer is cut into chunks of at most `max_batch_size`
  /// sorted ids. Dependencies on workloads outside the phase are satisfied
  /// earlier and do not order batches. Deterministic for identical input.
  pub fn plan(
    &self,
    phase: Phase,
    workloads: &[Workload],
    excluded: &BTreeSet<WorkloadId>,
  ) -> Result<Plan, PlanError> {
    validate_inventory(workloads)?;

    let members: BTreeSet<String> = workloads
      .iter()
      .filter(|w| w.phase == phase && !excluded.contains(&w.workload_id))
      .map(|w| w.workload_id.clone())
      .collect();

    let graph = Graph::from_workloads(workloads).subgraph(&members);

    let mut batches = Vec::new();
    for layer in graph.layers()? {
      for chunk in layer.chunks(self.max_batch_size) {
        batches.push(Batch {
          phase,
          index: batches.len(),
          workloads: chunk.to_vec(),
        });
      }
    }

    Ok(Plan { phase, batches })
  }
}
