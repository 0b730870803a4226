//! Phase state machine guards.
//!
//! ```text
//! Prep -> Pilot -> Bulk -> Optimize -> Decommission
//! ```
//!
//! Phases advance one step at a time and never regress. Leaving a phase
//! requires every workload scheduled in it to be committed or excluded; the
//! configured entry checks of the next phase are run by the orchestrator.

use cutover_config::Phase;

use crate::error::PhaseError;
use crate::state::MigrationState;

/// The phase `begin` enters.
pub fn check_begin(view: &MigrationState) -> Result<Phase, PhaseError> {
  match view.current_phase() {
    Some(current) => Err(PhaseError::AlreadyBegun { current }),
    None => Ok(Phase::Prep),
  }
}

/// The `(current, next)` pair for an advance, once the exit guard holds.
pub fn check_advance(view: &MigrationState) -> Result<(Phase, Phase), PhaseError> {
  let current = view.current_phase().ok_or(PhaseError::NotBegun)?;
  let next = current
    .next()
    .ok_or(PhaseError::NoNextPhase { current })?;

  let pending = view.pending_in(current);
  if !pending.is_empty() {
    return Err(PhaseError::ScheduledPending { current, pending });
  }

  Ok((current, next))
}

/// `phase` must be the active phase.
pub fn check_active(view: &MigrationState, phase: Phase) -> Result<(), PhaseError> {
  let current = view.current_phase();
  if current == Some(phase) {
    Ok(())
  } else {
    Err(PhaseError::NotActive {
      requested: phase,
      current,
    })
  }
}
