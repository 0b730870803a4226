//! Cutover Config
//!
//! This crate contains the serializable configuration types for cutover.
//! These types describe how a migration program is run: which workload
//! transitions each phase permits, who may approve a rollback and for how
//! long, how validation checks are retried, and how batches are sized.
//!
//! Every type implements `Default` and deserializes from partial JSON, so a
//! caller only spells out what differs from the built-in runbook defaults:
//!
//! ```json
//! {
//!   "max_batch_size": 20,
//!   "checks": { "post_cutover": ["gateway_ping", "contract_hits"] },
//!   "phases": { "pilot": { "automatic_rollback": false } }
//! }
//! ```
//!
//! Loading the document from disk is left to the embedding application.

mod enums;
mod orchestrator;
mod phase;

pub use enums::{ActorClass, Phase, RetryBackoff, ScopeKind, TransitionKind};
pub use orchestrator::{CheckSets, ConfigError, GateConfig, OrchestratorConfig};
pub use phase::{AuthorityBand, PhasePolicy};
