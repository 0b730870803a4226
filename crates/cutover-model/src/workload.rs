use std::collections::BTreeSet;
use std::fmt;

use cutover_config::Phase;
use serde::{Deserialize, Serialize};

/// Stable workload identifier, used as the sort key for deterministic planning.
pub type WorkloadId = String;

/// Opaque description of where a workload is attached.
///
/// The orchestrator never interprets these fields; they are handed to the
/// attachment driver as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attachment {
  /// Switch or leaf, e.g. "n9k-agg-1" or "leaf-101".
  pub node: String,
  /// Port or port-channel, e.g. "Eth1/12".
  pub interface: String,
  /// Encapsulation or endpoint group, e.g. "vlan-110" or "epg-web".
  pub encap: String,
}

impl Attachment {
  pub fn new(
    node: impl Into<String>,
    interface: impl Into<String>,
    encap: impl Into<String>,
  ) -> Self {
    Self {
      node: node.into(),
      interface: interface.into(),
      encap: encap.into(),
    }
  }
}

impl fmt::Display for Attachment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{} ({})", self.node, self.interface, self.encap)
  }
}

/// Which attachment a workload is currently on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentSide {
  Source,
  Target,
  /// A switch was attempted and its outcome was never observed.
  Unknown,
}

/// Direction of an attachment switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
  Forward,
  Rollback,
}

impl Direction {
  /// Side the workload ends up on when the switch succeeds.
  pub fn destination(self) -> AttachmentSide {
    match self {
      Direction::Forward => AttachmentSide::Target,
      Direction::Rollback => AttachmentSide::Source,
    }
  }
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Direction::Forward => f.write_str("forward"),
      Direction::Rollback => f.write_str("rollback"),
    }
  }
}

/// A migratable unit of network attachment (server or VM).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
  pub workload_id: WorkloadId,
  /// Application tier tag, e.g. "web", "app", "db".
  pub tier: String,
  /// Phase this workload is scheduled to migrate in.
  pub phase: Phase,
  pub source: Attachment,
  pub target: Attachment,
  /// Workloads that must be committed before this one may be prepared.
  #[serde(default)]
  pub dependencies: BTreeSet<WorkloadId>,
}

impl Workload {
  pub fn new(
    workload_id: impl Into<String>,
    tier: impl Into<String>,
    phase: Phase,
    source: Attachment,
    target: Attachment,
  ) -> Self {
    Self {
      workload_id: workload_id.into(),
      tier: tier.into(),
      phase,
      source,
      target,
      dependencies: BTreeSet::new(),
    }
  }

  /// Add a predecessor that must migrate first.
  pub fn depends_on(mut self, workload_id: impl Into<String>) -> Self {
    self.dependencies.insert(workload_id.into());
    self
  }

  /// The attachment descriptor for `side`, if the side is known.
  pub fn attachment(&self, side: AttachmentSide) -> Option<&Attachment> {
    match side {
      AttachmentSide::Source => Some(&self.source),
      AttachmentSide::Target => Some(&self.target),
      AttachmentSide::Unknown => None,
    }
  }
}
