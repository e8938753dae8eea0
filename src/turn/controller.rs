//! Phase sequencing and turn rollover.
//!
//! Enforces phase order and step completion on the ledger's `TurnState`.
//! `end_turn` is the only function allowed to reset turn state wholesale.

use tracing::info;

use super::phase::{TurnPhase, ALL_PHASES, BASE_EVENT_DC};
use crate::kingdom::KingdomLedger;

/// Lowest the event DC can fall between triggered events.
pub const MIN_EVENT_DC: u32 = 6;
/// How much the event DC drops after a roll that triggers nothing.
pub const EVENT_DC_STEP: u32 = 5;

/// Index of the upkeep step that pays into the construction queue.
pub const UPKEEP_BUILD_STEP: usize = 1;

/// Errors from phase advancement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("{phase} phase has {remaining} incomplete step(s)")]
    StepsIncomplete { phase: TurnPhase, remaining: usize },

    #[error("upkeep is the last phase; end the turn instead")]
    LastPhase,
}

/// Seeds the step flags for `phase` unless already seeded this turn.
/// Returns true if the phase was newly seeded.
pub fn start_phase(ledger: &mut KingdomLedger, phase: TurnPhase) -> bool {
    let turn = ledger.turn_state_mut();
    let slot = &mut turn.steps[phase as usize];
    if slot.is_some() {
        return false;
    }
    *slot = Some(vec![false; phase.step_count()]);
    true
}

/// Marks step `index` of `phase` complete. Completing a completed step is a no-op.
///
/// # Panics
///
/// Panics if the phase has not been started or `index` is out of range.
pub fn complete_step(ledger: &mut KingdomLedger, phase: TurnPhase, index: usize) {
    let steps = ledger.turn_state_mut().steps[phase as usize]
        .as_mut()
        .unwrap_or_else(|| panic!("complete_step: {} phase not started", phase));
    assert!(
        index < steps.len(),
        "complete_step: step {} out of range for {} phase ({} steps)",
        index,
        phase,
        steps.len()
    );
    steps[index] = true;
}

/// Returns true if `phase` is the phase the kingdom is currently in.
pub fn is_viewing_current_phase(ledger: &KingdomLedger, phase: TurnPhase) -> bool {
    ledger.turn_state().phase == phase
}

/// Moves to the next phase once every step of the current one is complete,
/// and starts it.
pub fn advance_phase(ledger: &mut KingdomLedger) -> Result<TurnPhase, TurnError> {
    let current = ledger.turn_state().phase;
    let remaining = match ledger.turn_state().steps(current) {
        Some(steps) => steps.iter().filter(|&&done| !done).count(),
        None => current.step_count(),
    };
    if remaining > 0 {
        return Err(TurnError::StepsIncomplete { phase: current, remaining });
    }
    let next = current.next().ok_or(TurnError::LastPhase)?;
    ledger.turn_state_mut().phase = next;
    start_phase(ledger, next);
    info!(turn = ledger.turn_state().turn, phase = %next, "phase advanced");
    Ok(next)
}

/// Records the last event roll. Returns true if an event triggers.
///
/// A triggering roll resets the DC; otherwise the DC drops toward its floor.
pub fn record_event_roll(ledger: &mut KingdomLedger, roll: u32) -> bool {
    let turn = ledger.turn_state_mut();
    turn.last_event_roll = Some(roll);
    let triggered = roll >= turn.event_dc;
    turn.event_dc = if triggered {
        BASE_EVENT_DC
    } else {
        turn.event_dc.saturating_sub(EVENT_DC_STEP).max(MIN_EVENT_DC)
    };
    triggered
}

/// Pays into the construction queue and marks the upkeep build step done.
/// Returns the ids of completed projects.
pub fn process_build_queue(ledger: &mut KingdomLedger) -> Vec<String> {
    start_phase(ledger, TurnPhase::Upkeep);
    let completed = ledger.progress_build_queue();
    complete_step(ledger, TurnPhase::Upkeep, UPKEEP_BUILD_STEP);
    completed
}

/// Ends the turn.
///
/// Drops non-storable resources, increments the turn, returns to the first
/// phase with fresh step flags, and clears the action log, aid records, the
/// event roll and every check instance. The event DC carries over.
pub fn end_turn(ledger: &mut KingdomLedger) -> u32 {
    ledger.drop_non_storable();
    ledger.checks_mut().clear_all();

    let turn = ledger.turn_state_mut();
    turn.turn += 1;
    turn.phase = ALL_PHASES[0];
    turn.steps = Default::default();
    turn.action_log.clear();
    turn.aids.clear();
    turn.last_event_roll = None;
    let new_turn = turn.turn;

    for phase in ALL_PHASES {
        start_phase(ledger, phase);
    }
    info!(turn = new_turn, "turn ended");
    new_turn
}
