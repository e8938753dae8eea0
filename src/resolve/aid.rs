//! Aid checks.
//!
//! A player may roll a secondary check to help another player's pending
//! check. The aid tier and the aiding character's proficiency rank produce a
//! bonus (or penalty) that the target check's roll picks up. Records are kept
//! per (aiding player, target check) and purged once the target rolls.

use serde::{Deserialize, Serialize};

use crate::check::OutcomeTier;

/// Proficiency rank of the aiding character: 0 untrained … 4 legendary.
pub type ProficiencyRank = u8;

/// Level-based DC for characters of level 0 through 20.
const LEVEL_DCS: [u32; 21] = [
    14, 15, 16, 18, 19, 20, 22, 23, 24, 26, 27, 28, 30, 31, 32, 34, 35, 36, 38, 39, 40,
];

/// DC of an aid check for an acting character of `level`.
/// Levels above 20 use the level-20 DC.
pub fn aid_dc(level: u32) -> u32 {
    LEVEL_DCS[(level as usize).min(LEVEL_DCS.len() - 1)]
}

/// Bonus granted by an aid roll, or `None` when nothing is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AidBonus {
    pub bonus: i32,
    pub keep_higher: bool,
}

/// Computes the aid bonus for `tier` at proficiency `rank`.
///
/// | tier | bonus |
/// |---|---|
/// | critical success | +4, keep higher of two rolls |
/// | success | untrained 1, trained/expert 2, master 3, legendary 4 |
/// | failure | none |
/// | critical failure | −1 |
pub fn aid_bonus(tier: OutcomeTier, rank: ProficiencyRank) -> Option<AidBonus> {
    match tier {
        OutcomeTier::CriticalSuccess => Some(AidBonus { bonus: 4, keep_higher: true }),
        OutcomeTier::Success => {
            let bonus = match rank {
                0 => 1,
                1 | 2 => 2,
                3 => 3,
                _ => 4,
            };
            Some(AidBonus { bonus, keep_higher: false })
        }
        OutcomeTier::Failure => None,
        OutcomeTier::CriticalFailure => Some(AidBonus { bonus: -1, keep_higher: false }),
    }
}

/// A stored aid result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AidRecord {
    pub player_id: String,
    pub character_name: String,
    pub target_check_id: String,
    pub skill: String,
    pub tier: OutcomeTier,
    pub bonus: i32,
    pub keep_higher: bool,
    pub timestamp: u64,
}

/// Active aid records for the current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AidBook {
    records: Vec<AidRecord>,
}

impl AidBook {
    /// Stores `record`, replacing any earlier record by the same player for
    /// the same target.
    pub fn store(&mut self, record: AidRecord) {
        self.records.retain(|r| {
            !(r.player_id == record.player_id && r.target_check_id == record.target_check_id)
        });
        self.records.push(record);
    }

    /// Combined bonus and keep-higher flag for `target_check_id`.
    pub fn bonus_for(&self, target_check_id: &str) -> AidBonus {
        self.for_target(target_check_id).fold(
            AidBonus { bonus: 0, keep_higher: false },
            |acc, r| AidBonus {
                bonus: acc.bonus + r.bonus,
                keep_higher: acc.keep_higher || r.keep_higher,
            },
        )
    }

    pub fn for_target<'a>(&'a self, target_check_id: &'a str) -> impl Iterator<Item = &'a AidRecord> + 'a {
        self.records.iter().filter(move |r| r.target_check_id == target_check_id)
    }

    /// Removes every record for `target_check_id`. Returns how many were removed.
    pub fn purge_target(&mut self, target_check_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.target_check_id != target_check_id);
        before - self.records.len()
    }

    pub fn records(&self) -> &[AidRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }
}
