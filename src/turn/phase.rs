//! Turn phases and per-turn state.
//!
//! A kingdom turn walks through six phases in a fixed order. Each phase has a
//! static number of steps whose completion flags are seeded when the phase is
//! started and only ever flip from false to true until the turn ends.

use serde::{Deserialize, Serialize};

use super::action_log::ActionLog;
use crate::resolve::aid::AidBook;

/// The number of phases in a turn.
pub const PHASE_COUNT: usize = 6;

/// Event DC at the start of a game and after an event triggers.
pub const BASE_EVENT_DC: u32 = 16;

/// A phase within a kingdom turn, in play order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TurnPhase {
    Status = 0,
    Resources = 1,
    Unrest = 2,
    Events = 3,
    Actions = 4,
    Upkeep = 5,
}

/// All phases in play order.
pub const ALL_PHASES: [TurnPhase; PHASE_COUNT] = [
    TurnPhase::Status,
    TurnPhase::Resources,
    TurnPhase::Unrest,
    TurnPhase::Events,
    TurnPhase::Actions,
    TurnPhase::Upkeep,
];

/// Phases whose checks draw on a player's action economy.
pub const ACTION_ECONOMY_PHASES: [TurnPhase; 2] = [TurnPhase::Events, TurnPhase::Actions];

impl TurnPhase {
    /// Number of completable steps in this phase.
    pub const fn step_count(self) -> usize {
        match self {
            TurnPhase::Status => 1,
            TurnPhase::Resources => 1,
            TurnPhase::Unrest => 1,
            TurnPhase::Events => 2,
            TurnPhase::Actions => 1,
            TurnPhase::Upkeep => 2,
        }
    }

    /// Returns the following phase, or `None` after upkeep.
    pub fn next(self) -> Option<TurnPhase> {
        ALL_PHASES.get(self as usize + 1).copied()
    }

    /// Returns the lowercase name used by the protocol.
    pub const fn name(self) -> &'static str {
        match self {
            TurnPhase::Status => "status",
            TurnPhase::Resources => "resources",
            TurnPhase::Unrest => "unrest",
            TurnPhase::Events => "events",
            TurnPhase::Actions => "actions",
            TurnPhase::Upkeep => "upkeep",
        }
    }

    /// Parses a phase from its lowercase name.
    pub fn from_name(s: &str) -> Option<TurnPhase> {
        ALL_PHASES.iter().copied().find(|p| p.name() == s)
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Turn bookkeeping owned by the kingdom ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    pub turn: u32,
    pub phase: TurnPhase,
    /// Step flags per phase; `None` until the phase is started this turn.
    pub(crate) steps: [Option<Vec<bool>>; PHASE_COUNT],
    pub action_log: ActionLog,
    pub aids: AidBook,
    pub last_event_roll: Option<u32>,
    pub event_dc: u32,
}

impl TurnState {
    /// Creates the state for the given turn, positioned at the first phase
    /// with no phase seeded.
    pub fn new(turn: u32) -> Self {
        TurnState {
            turn,
            phase: TurnPhase::Status,
            steps: Default::default(),
            action_log: ActionLog::default(),
            aids: AidBook::default(),
            last_event_roll: None,
            event_dc: BASE_EVENT_DC,
        }
    }

    /// Returns the step flags for `phase`, if it has been started this turn.
    pub fn steps(&self, phase: TurnPhase) -> Option<&[bool]> {
        self.steps[phase as usize].as_deref()
    }

    /// Returns true if `phase` has been started and every step is complete.
    pub fn phase_complete(&self, phase: TurnPhase) -> bool {
        self.steps(phase)
            .map(|s| s.iter().all(|&done| done))
            .unwrap_or(false)
    }
}

impl Default for TurnState {
    fn default() -> Self {
        TurnState::new(1)
    }
}
