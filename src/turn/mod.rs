//! Turn structure.
//!
//! Phase order and step flags, the action-economy log, and the controller
//! that advances phases and rolls the turn over.

pub mod action_log;
pub mod controller;
pub mod phase;

pub use action_log::{ActionGate, ActionLog, ActionLogEntry, ACTIONS_PER_TURN};
pub use controller::{
    advance_phase, complete_step, end_turn, is_viewing_current_phase, process_build_queue,
    record_event_roll, start_phase, TurnError,
};
pub use phase::{TurnPhase, TurnState, ACTION_ECONOMY_PHASES, ALL_PHASES, PHASE_COUNT};
