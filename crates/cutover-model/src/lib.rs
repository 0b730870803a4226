//! Cutover Model
//!
//! This crate provides the data model shared by every other cutover crate:
//! workloads and their attachments, the workload state edges, the dependency
//! graph, the batch planner and the rollback decision types.
//!
//! Key properties:
//! - The dependency graph is deterministic: nodes and adjacency are kept in
//!   sorted maps, so layering and topological order are reproducible.
//! - Planning is all-or-nothing: a cycle, an unknown dependency or a
//!   cross-phase conflict fails the whole plan.
//! - Nothing here mutates orchestration state; the engine owns that.

mod clock;
mod error;
mod graph;
mod plan;
mod rollback;
mod state;
mod workload;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DependencyCycleError, PlanError};
pub use graph::Graph;
pub use plan::{Batch, Plan, Planner, validate_inventory};
pub use rollback::{RollbackDecision, RollbackOutcome, RollbackScope};
pub use state::WorkloadState;
pub use workload::{Attachment, AttachmentSide, Direction, Workload, WorkloadId};

pub use cutover_config::{ActorClass, Phase, ScopeKind, TransitionKind};
