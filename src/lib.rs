//! Cutover
//!
//! Phased migration of workloads from a legacy fabric onto a policy-driven
//! fabric. Workloads move in dependency-ordered batches, every move is gated
//! by validation checks, and every decision lands in an append-only audit log
//! that can rebuild the orchestrator's state after a restart.
//!
//! This crate re-exports the workspace's public surface:
//!
//! - [`config`]: serializable configuration and phase policies
//! - [`model`]: workloads, the dependency graph, the batch planner
//! - [`gate`]: the validation gate and the `Probe` capability
//! - [`store`]: the audit log
//! - [`engine`]: the orchestrator and its collaborator traits

pub use cutover_config as config;
pub use cutover_engine as engine;
pub use cutover_gate as gate;
pub use cutover_model as model;
pub use cutover_store as store;

pub use cutover_config::{ActorClass, OrchestratorConfig, Phase};
pub use cutover_engine::{
  AttachmentDriver, Collaborators, InventoryProvider, Orchestrator, OrchestratorError, RunReport,
  StatusReport, StatusScope,
};
pub use cutover_gate::Probe;
pub use cutover_model::{RollbackScope, Workload};
pub use cutover_store::{EventLog, MemoryEventLog, SqliteEventLog};
