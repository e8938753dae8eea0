//! The shared kingdom record.
//!
//! `KingdomLedger` is the only shared mutable resource. Fields are private;
//! every write goes through a named mutator so the replication layer always
//! ships a consistent whole-record snapshot.

use serde::{Deserialize, Serialize};

use super::resource::{Modifier, Resource, ResourceStock, ALL_RESOURCES};
use super::settlement::{BuildProject, Settlement};
use crate::check::CheckRegistry;
use crate::error::CheckError;
use crate::turn::TurnState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KingdomLedger {
    name: String,
    resources: ResourceStock,
    settlements: Vec<Settlement>,
    build_queue: Vec<BuildProject>,
    next_project: u64,
    turn: TurnState,
    checks: CheckRegistry,
}

impl KingdomLedger {
    /// Creates a kingdom at turn 1 with empty stock.
    pub fn new(name: impl Into<String>) -> Self {
        KingdomLedger {
            name: name.into(),
            next_project: 1,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &ResourceStock {
        &self.resources
    }

    pub fn resource(&self, resource: Resource) -> i32 {
        self.resources.get(resource)
    }

    pub fn settlements(&self) -> &[Settlement] {
        &self.settlements
    }

    pub fn settlement(&self, id: &str) -> Option<&Settlement> {
        self.settlements.iter().find(|s| s.id == id)
    }

    pub fn build_queue(&self) -> &[BuildProject] {
        &self.build_queue
    }

    pub fn turn_state(&self) -> &TurnState {
        &self.turn
    }

    pub fn checks(&self) -> &CheckRegistry {
        &self.checks
    }

    pub(crate) fn turn_state_mut(&mut self) -> &mut TurnState {
        &mut self.turn
    }

    pub(crate) fn checks_mut(&mut self) -> &mut CheckRegistry {
        &mut self.checks
    }

    /// Adds `delta` to a resource, flooring at zero. Returns the applied change.
    pub fn adjust_resource(&mut self, resource: Resource, delta: i32) -> i32 {
        self.resources.adjust(resource, delta)
    }

    /// Sets a resource outright (floored at zero).
    pub fn set_resource(&mut self, resource: Resource, amount: i32) {
        self.resources.set(resource, amount);
    }

    /// Applies a list of modifiers and returns the applied change per entry.
    pub fn apply_modifiers(&mut self, modifiers: &[Modifier]) -> Vec<i32> {
        modifiers
            .iter()
            .map(|m| self.resources.adjust(m.resource, m.value))
            .collect()
    }

    /// Zeroes every non-storable resource.
    pub(crate) fn drop_non_storable(&mut self) {
        for r in ALL_RESOURCES.iter().filter(|r| !r.is_storable()) {
            self.resources.set(*r, 0);
        }
    }

    /// Founds a settlement. A settlement with the same id is replaced.
    pub fn add_settlement(&mut self, settlement: Settlement) {
        match self.settlements.iter_mut().find(|s| s.id == settlement.id) {
            Some(existing) => *existing = settlement,
            None => self.settlements.push(settlement),
        }
    }

    /// Raises a settlement by one level and returns the new level.
    pub fn upgrade_settlement(&mut self, id: &str) -> Result<u32, CheckError> {
        let settlement = self
            .settlements
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CheckError::MissingSettlement(id.to_string()))?;
        settlement.level += 1;
        Ok(settlement.level)
    }

    /// Records a finished structure in a settlement.
    pub fn add_structure(&mut self, settlement_id: &str, structure_id: &str) -> Result<(), CheckError> {
        let settlement = self
            .settlements
            .iter_mut()
            .find(|s| s.id == settlement_id)
            .ok_or_else(|| CheckError::MissingSettlement(settlement_id.to_string()))?;
        settlement.structures.push(structure_id.to_string());
        Ok(())
    }

    /// Appends a construction project and returns its id.
    ///
    /// A discounted project has its total and remaining cost halved once,
    /// rounding each resource up.
    pub fn queue_project(
        &mut self,
        structure_id: &str,
        settlement_id: &str,
        cost: &[Modifier],
        discounted: bool,
    ) -> Result<String, CheckError> {
        if self.settlement(settlement_id).is_none() {
            return Err(CheckError::MissingSettlement(settlement_id.to_string()));
        }
        let id = format!("project-{}", self.next_project);
        self.next_project += 1;
        let cost: Vec<(Resource, i32)> = cost.iter().map(|m| (m.resource, m.value)).collect();
        let mut project = BuildProject::new(id.clone(), structure_id, settlement_id, &cost);
        if discounted {
            project.halve_cost();
        }
        self.build_queue.push(project);
        Ok(id)
    }

    /// Pays what the stock allows toward every queued project, in queue order,
    /// then completes and removes projects that are fully paid.
    /// Returns the ids of completed projects.
    pub fn progress_build_queue(&mut self) -> Vec<String> {
        for project in self.build_queue.iter_mut() {
            for r in ALL_RESOURCES {
                let owed = project.remaining[r as usize];
                if owed <= 0 {
                    continue;
                }
                let paid = owed.min(self.resources.get(r));
                self.resources.adjust(r, -paid);
                project.remaining[r as usize] -= paid;
            }
        }

        let (done, pending): (Vec<_>, Vec<_>) =
            self.build_queue.drain(..).partition(|p| p.is_paid());
        self.build_queue = pending;

        let mut completed = Vec::with_capacity(done.len());
        for project in done {
            if let Some(s) = self.settlements.iter_mut().find(|s| s.id == project.settlement_id) {
                s.structures.push(project.structure_id.clone());
            }
            completed.push(project.id);
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kingdom() -> KingdomLedger {
        let mut k = KingdomLedger::new("Stolen Lands");
        k.add_settlement(Settlement::new("s1", "Tatzlford", 1));
        k
    }

    #[test]
    fn resource_floor() {
        let mut k = kingdom();
        k.set_resource(Resource::Gold, 3);
        assert_eq!(k.adjust_resource(Resource::Gold, -5), -3);
        assert_eq!(k.resource(Resource::Gold), 0);
    }

    #[test]
    fn drop_non_storable_keeps_storable() {
        let mut k = kingdom();
        k.set_resource(Resource::Gold, 7);
        k.set_resource(Resource::Food, 2);
        k.set_resource(Resource::Lumber, 5);
        k.set_resource(Resource::Ore, 1);
        k.drop_non_storable();
        assert_eq!(k.resource(Resource::Gold), 7);
        assert_eq!(k.resource(Resource::Food), 2);
        assert_eq!(k.resource(Resource::Lumber), 0);
        assert_eq!(k.resource(Resource::Ore), 0);
    }

    #[test]
    fn upgrade_unknown_settlement_fails() {
        let mut k = kingdom();
        assert_eq!(k.upgrade_settlement("s1"), Ok(2));
        assert_eq!(
            k.upgrade_settlement("nowhere"),
            Err(CheckError::MissingSettlement("nowhere".into()))
        );
    }

    #[test]
    fn discounted_project_rounds_up_per_resource() {
        let mut k = kingdom();
        let id = k
            .queue_project(
                "barracks",
                "s1",
                &[
                    Modifier::new(Resource::Lumber, 3),
                    Modifier::new(Resource::Stone, 3),
                    Modifier::new(Resource::Ore, 1),
                ],
                true,
            )
            .unwrap();
        let p = &k.build_queue()[0];
        assert_eq!(p.id, id);
        assert_eq!(p.total[Resource::Lumber as usize], 2);
        assert_eq!(p.total[Resource::Stone as usize], 2);
        assert_eq!(p.total[Resource::Ore as usize], 1);
        assert_eq!(p.remaining, p.total);
    }

    #[test]
    fn build_queue_pays_in_order_and_completes() {
        let mut k = kingdom();
        k.queue_project("mill", "s1", &[Modifier::new(Resource::Lumber, 2)], false)
            .unwrap();
        k.queue_project("market", "s1", &[Modifier::new(Resource::Lumber, 2)], false)
            .unwrap();
        k.set_resource(Resource::Lumber, 3);

        let done = k.progress_build_queue();
        assert_eq!(done, vec!["project-1".to_string()]);
        assert_eq!(k.resource(Resource::Lumber), 0);
        assert_eq!(k.build_queue().len(), 1);
        assert_eq!(k.build_queue()[0].remaining[Resource::Lumber as usize], 1);
        assert_eq!(k.settlement("s1").unwrap().structures, vec!["mill".to_string()]);
    }

    #[test]
    fn queue_requires_settlement() {
        let mut k = kingdom();
        let err = k.queue_project("mill", "ghost", &[], false).unwrap_err();
        assert_eq!(err, CheckError::MissingSettlement("ghost".into()));
        assert!(k.build_queue().is_empty());
    }
}
