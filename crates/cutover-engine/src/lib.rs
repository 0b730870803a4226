//! Cutover Engine
//!
//! Drives workloads from a legacy fabric onto a policy-driven fabric in
//! phases, one dependency-ordered batch at a time.
//!
//! ```text
//!   InventoryProvider --> load_inventory --> WorkloadRegistered events
//!                                                  |
//!   begin / advance_phase --(entry checks)--> PhaseEntered
//!                                                  |
//!   run(phase) --> plan --> batch 0 --> batch 1 --> ...
//!                             |
//!                             +--> per workload (bounded concurrency):
//!                                    Prepare -> pre-cutover gate -> Cutover
//!                                    -> AttachmentDriver::switch -> Validate
//!                                    -> post-cutover gate -> Commit
//!                                          |
//!                                          +-- failure --> rollback decision
//!                                                          (authority bands)
//!
//!   every mutation: guard check -> EventLog::append -> MigrationState::apply
//! ```
//!
//! The audit log is the source of truth. Opening an orchestrator replays it;
//! a workload whose switch outcome was never recorded is reconciled through
//! the probe before anything else happens to it.

mod driver;
mod error;
mod notifier;
mod orchestrator;
mod phase;
mod rollback;
mod state;
mod status;
mod workload;

pub use driver::{AttachmentDriver, DriverError, InventoryError, InventoryProvider, StaticInventory};
pub use error::{ErrorKind, OrchestratorError, PhaseError, TransitionError};
pub use notifier::{ChannelNotifier, NoopNotifier, Notifier};
pub use orchestrator::{Collaborators, Orchestrator, RunReport, WorkloadOutcome};
pub use state::{Issue, MigrationState, PhaseRecord, WorkloadRecord};
pub use status::{StatusReport, StatusScope, WorkloadStatus};
