//! Settlements and the construction queue.

use serde::{Deserialize, Serialize};

use super::resource::{Resource, ALL_RESOURCES, RESOURCE_COUNT};

/// A settlement in the kingdom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: String,
    pub name: String,
    pub level: u32,
    #[serde(default)]
    pub structures: Vec<String>,
}

impl Settlement {
    pub fn new(id: impl Into<String>, name: impl Into<String>, level: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            level: level.max(1),
            structures: Vec::new(),
        }
    }
}

/// A structure waiting in the construction queue.
///
/// `total` is the full bill and `remaining` what is still owed; both are
/// indexed by `Resource as usize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProject {
    pub id: String,
    pub structure_id: String,
    pub settlement_id: String,
    pub total: [i32; RESOURCE_COUNT],
    pub remaining: [i32; RESOURCE_COUNT],
}

impl BuildProject {
    /// Creates a project whose remaining cost equals its total cost.
    pub fn new(
        id: impl Into<String>,
        structure_id: impl Into<String>,
        settlement_id: impl Into<String>,
        cost: &[(Resource, i32)],
    ) -> Self {
        let mut total = [0; RESOURCE_COUNT];
        for &(r, amount) in cost {
            total[r as usize] += amount.max(0);
        }
        Self {
            id: id.into(),
            structure_id: structure_id.into(),
            settlement_id: settlement_id.into(),
            total,
            remaining: total,
        }
    }

    /// Halves both total and remaining cost, rounding each resource up.
    pub fn halve_cost(&mut self) {
        for r in ALL_RESOURCES {
            let i = r as usize;
            self.total[i] = half_rounded_up(self.total[i]);
            self.remaining[i] = half_rounded_up(self.remaining[i]);
        }
    }

    /// Returns true once nothing is owed.
    pub fn is_paid(&self) -> bool {
        self.remaining.iter().all(|&v| v <= 0)
    }
}

/// Integer half of a non-negative amount, rounded up.
pub const fn half_rounded_up(amount: i32) -> i32 {
    (amount + 1) / 2
}
