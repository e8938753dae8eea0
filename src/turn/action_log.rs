//! Append-only action-economy log.
//!
//! Each entry says a player spent one action slot on a check during a phase.
//! The log is only consulted as a membership predicate and only cleared at
//! turn rollover.

use serde::{Deserialize, Serialize};

use super::phase::{TurnPhase, ACTION_ECONOMY_PHASES};

/// Actions a player may take per turn across the events and actions phases.
pub const ACTIONS_PER_TURN: usize = 4;

/// One spent action slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub player_id: String,
    pub phase: TurnPhase,
    pub check_id: String,
    pub timestamp: u64,
}

/// Whether a player may start another check without confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionGate {
    /// No action taken yet this turn.
    Free,
    /// The player already acted; the UI must confirm before another action.
    NeedsConfirmation { taken: usize, allowance: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLog {
    entries: Vec<ActionLogEntry>,
}

impl ActionLog {
    /// Appends an entry. Never deduplicates.
    pub fn record_action(
        &mut self,
        player_id: &str,
        phase: TurnPhase,
        check_id: &str,
        timestamp: u64,
    ) {
        self.entries.push(ActionLogEntry {
            player_id: player_id.to_string(),
            phase,
            check_id: check_id.to_string(),
            timestamp,
        });
    }

    /// Returns true if `player_id` has an entry in any of `phases`.
    pub fn has_acted(&self, player_id: &str, phases: &[TurnPhase]) -> bool {
        self.count(player_id, phases) > 0
    }

    /// Number of entries for `player_id` in any of `phases`.
    pub fn count(&self, player_id: &str, phases: &[TurnPhase]) -> usize {
        self.entries
            .iter()
            .filter(|e| e.player_id == player_id && phases.contains(&e.phase))
            .count()
    }

    /// Action-economy gate for starting another check.
    pub fn gate(&self, player_id: &str, allowance: usize) -> ActionGate {
        let taken = self.count(player_id, &ACTION_ECONOMY_PHASES);
        if taken == 0 {
            ActionGate::Free
        } else {
            ActionGate::NeedsConfirmation { taken, allowance }
        }
    }

    pub fn entries(&self) -> &[ActionLogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry. Only turn rollover calls this.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_acted_matches_player_and_phase() {
        let mut log = ActionLog::default();
        log.record_action("p1", TurnPhase::Actions, "claim-hexes", 1);
        assert!(log.has_acted("p1", &[TurnPhase::Actions]));
        assert!(log.has_acted("p1", &ACTION_ECONOMY_PHASES));
        assert!(!log.has_acted("p1", &[TurnPhase::Events]));
        assert!(!log.has_acted("p2", &ACTION_ECONOMY_PHASES));
    }

    #[test]
    fn record_does_not_deduplicate() {
        let mut log = ActionLog::default();
        log.record_action("p1", TurnPhase::Actions, "claim-hexes", 1);
        log.record_action("p1", TurnPhase::Actions, "claim-hexes", 1);
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn first_action_is_free() {
        let log = ActionLog::default();
        assert_eq!(log.gate("p1", ACTIONS_PER_TURN), ActionGate::Free);
    }

    #[test]
    fn second_action_needs_confirmation() {
        let mut log = ActionLog::default();
        log.record_action("p1", TurnPhase::Events, "bandits", 1);
        assert_eq!(
            log.gate("p1", ACTIONS_PER_TURN),
            ActionGate::NeedsConfirmation { taken: 1, allowance: ACTIONS_PER_TURN }
        );
    }

    #[test]
    fn fifth_attempt_is_never_silently_allowed() {
        let mut log = ActionLog::default();
        for i in 0..4 {
            let phase = if i % 2 == 0 { TurnPhase::Actions } else { TurnPhase::Events };
            log.record_action("p1", phase, "deal-with-unrest", i);
        }
        assert!(log.has_acted("p1", &ACTION_ECONOMY_PHASES));
        assert_eq!(
            log.gate("p1", ACTIONS_PER_TURN),
            ActionGate::NeedsConfirmation { taken: 4, allowance: ACTIONS_PER_TURN }
        );
    }

    #[test]
    fn other_phases_do_not_count() {
        let mut log = ActionLog::default();
        log.record_action("p1", TurnPhase::Upkeep, "collect", 1);
        assert_eq!(log.gate("p1", ACTIONS_PER_TURN), ActionGate::Free);
    }
}
