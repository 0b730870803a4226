//! Collaborator capabilities the orchestrator calls out to.

use std::time::Duration;

use async_trait::async_trait;
use cutover_model::{Direction, Workload};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DriverError {
  #[error("switch rejected: {0}")]
  Rejected(String),

  #[error("driver unavailable: {0}")]
  Unavailable(String),

  #[error("switch timed out after {}ms", .0.as_millis())]
  Timeout(Duration),
}

/// Moves a workload's network attachment between source and target.
///
/// Any error is treated as an unknown outcome: the switch may or may not
/// have taken effect, and a reconciliation probe decides.
#[async_trait]
pub trait AttachmentDriver: Send + Sync {
  /// Returns a diagnostic describing what was changed.
  async fn switch(
    &self,
    workload: &Workload,
    direction: Direction,
  ) -> Result<serde_json::Value, DriverError>;
}

#[derive(Debug, Error)]
pub enum InventoryError {
  #[error("inventory source unavailable: {0}")]
  Unavailable(String),

  #[error("invalid inventory: {0}")]
  Invalid(String),

  #[error("inventory parse error: {0}")]
  Parse(#[from] serde_json::Error),
}

/// Source of the workload list, dependency edges and attachment descriptors.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
  async fn workloads(&self) -> Result<Vec<Workload>, InventoryError>;
}

/// An inventory held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
  workloads: Vec<Workload>,
}

impl StaticInventory {
  pub fn new(workloads: Vec<Workload>) -> Self {
    Self { workloads }
  }

  /// Parse a JSON array of workloads.
  pub fn from_json(json: &str) -> Result<Self, InventoryError> {
    Ok(Self::new(serde_json::from_str(json)?))
  }
}

#[async_trait]
impl InventoryProvider for StaticInventory {
  async fn workloads(&self) -> Result<Vec<Workload>, InventoryError> {
    Ok(self.workloads.clone())
  }
}
