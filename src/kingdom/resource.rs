//! Kingdom resources and stock.
//!
//! Every numeric kingdom quantity a check can modify is a `Resource`,
//! including unrest and fame. Stock is held in a fixed-size array indexed by
//! the `Resource` discriminant for O(1) lookup, and no entry may go below zero.

use serde::{Deserialize, Serialize};

/// The number of tracked kingdom quantities.
pub const RESOURCE_COUNT: usize = 7;

/// A numeric kingdom quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Resource {
    Gold = 0,
    Food = 1,
    Lumber = 2,
    Stone = 3,
    Ore = 4,
    Unrest = 5,
    Fame = 6,
}

/// All resources in index order.
pub const ALL_RESOURCES: [Resource; RESOURCE_COUNT] = [
    Resource::Gold,
    Resource::Food,
    Resource::Lumber,
    Resource::Stone,
    Resource::Ore,
    Resource::Unrest,
    Resource::Fame,
];

impl Resource {
    /// Returns the lowercase name used in catalogs and protocol output.
    pub const fn name(self) -> &'static str {
        match self {
            Resource::Gold => "gold",
            Resource::Food => "food",
            Resource::Lumber => "lumber",
            Resource::Stone => "stone",
            Resource::Ore => "ore",
            Resource::Unrest => "unrest",
            Resource::Fame => "fame",
        }
    }

    /// Parses a resource from its lowercase name.
    pub fn from_name(s: &str) -> Option<Resource> {
        ALL_RESOURCES.iter().copied().find(|r| r.name() == s)
    }

    /// Returns true if the stock carries over at turn rollover.
    ///
    /// Raw building materials spoil at the end of every turn; treasury,
    /// granaries, unrest and fame persist.
    pub const fn is_storable(self) -> bool {
        !matches!(self, Resource::Lumber | Resource::Stone | Resource::Ore)
    }
}

/// Signed change to a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    pub resource: Resource,
    pub value: i32,
}

impl Modifier {
    pub const fn new(resource: Resource, value: i32) -> Self {
        Self { resource, value }
    }
}

/// Change actually applied to a resource after flooring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RealizedDelta {
    pub resource: Resource,
    pub requested: i32,
    pub applied: i32,
}

/// Current amount held for every resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStock {
    amounts: [i32; RESOURCE_COUNT],
}

impl ResourceStock {
    /// Creates an empty stock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the amount held of `resource`.
    pub fn get(&self, resource: Resource) -> i32 {
        self.amounts[resource as usize]
    }

    /// Adds `delta` to `resource`, clamping the result at zero.
    /// Returns the change that was actually applied.
    pub fn adjust(&mut self, resource: Resource, delta: i32) -> i32 {
        let idx = resource as usize;
        let before = self.amounts[idx];
        let after = before.saturating_add(delta).max(0);
        self.amounts[idx] = after;
        after - before
    }

    /// Sets `resource` to `amount`, clamped at zero.
    pub fn set(&mut self, resource: Resource, amount: i32) {
        self.amounts[resource as usize] = amount.max(0);
    }

    /// Returns true if every modifier's magnitude is covered by current stock.
    /// Positive modifiers are ignored.
    pub fn covers(&self, costs: &[Modifier]) -> bool {
        self.shortfalls(costs).is_empty()
    }

    /// Lists the resources that cannot cover the negative modifiers in `costs`,
    /// with the missing amount for each.
    pub fn shortfalls(&self, costs: &[Modifier]) -> Vec<(Resource, i32)> {
        let mut needed = [0i32; RESOURCE_COUNT];
        for m in costs.iter().filter(|m| m.value < 0) {
            needed[m.resource as usize] += -m.value;
        }
        ALL_RESOURCES
            .iter()
            .filter_map(|&r| {
                let missing = needed[r as usize] - self.get(r);
                (missing > 0).then_some((r, missing))
            })
            .collect()
    }
}
