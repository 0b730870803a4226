//! Cutover Validation Gate
//!
//! Runs named checks against a workload or a phase through the [`Probe`]
//! capability and folds the outcomes into a single [`GateResult`].
//!
//! ```text
//!   run_checks(target, stage, checks, timeout)
//!         |
//!         +--> check 1 --> timeout? --retry/backoff--> Pass | Fail
//!         +--> check 2 --> ...                          (concurrent)
//!         |
//!         v
//!   GateResult { verdict: Pass only if every check passed, failing: [...] }
//! ```
//!
//! Only timeouts are retried. A check that still times out after its retries
//! is reported as a failure with `timed_out` set. The gate holds no
//! orchestration state.

mod gate;
mod probe;
mod result;

pub use gate::ValidationGate;
pub use probe::{CheckOutcome, GateTarget, Probe, ProbeError, ProbeReport};
pub use result::{CheckResult, GateResult, GateStage, Verdict};
