//! Check instance registry.
//!
//! Holds one `CheckInstance` per in-flight attempt at a check. Instances move
//! forward through pending → resolved → applied and are removed once their
//! effects are committed or the attempt is cancelled. The registry lives in
//! the kingdom ledger so every client sees the same in-flight set.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::definition::{CheckKind, OutcomeTier};
use crate::error::CheckError;
use crate::kingdom::Modifier;
use crate::resolve::outcome::{ResolutionOutcome, SpecialEffect};

/// Unique identifier of a check instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle position of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Created; waiting for a roll outcome.
    Pending,
    /// Outcome stored as a preview.
    Resolved,
    /// Confirmed; effects may be committed once.
    Applied,
}

/// Marker naming the client currently resolving an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionProgress {
    pub player_id: String,
    pub player_name: String,
}

/// Outcome stored on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOutcome {
    pub tier: OutcomeTier,
    pub actor_name: String,
    pub skill_name: String,
    pub message: String,
    pub modifiers: Vec<Modifier>,
    pub manual_effects: Vec<String>,
    pub special_effects: Vec<SpecialEffect>,
    pub effects_applied: bool,
}

/// Run-time record of one attempt at a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInstance {
    pub id: InstanceId,
    pub kind: CheckKind,
    pub check_id: String,
    pub turn: u32,
    pub status: InstanceStatus,
    pub progress: Option<ResolutionProgress>,
    /// Pre-roll selections such as the chosen settlement, kept verbatim.
    pub metadata: BTreeMap<String, String>,
    pub outcome: Option<AppliedOutcome>,
}

impl CheckInstance {
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRegistry {
    instances: BTreeMap<InstanceId, CheckInstance>,
}

impl CheckRegistry {
    /// Allocates a pending instance under `id`.
    ///
    /// An existing instance with the same id is replaced.
    pub fn create_instance(
        &mut self,
        id: InstanceId,
        kind: CheckKind,
        check_id: &str,
        turn: u32,
        metadata: BTreeMap<String, String>,
    ) -> &CheckInstance {
        let instance = CheckInstance {
            id: id.clone(),
            kind,
            check_id: check_id.to_string(),
            turn,
            status: InstanceStatus::Pending,
            progress: None,
            metadata,
            outcome: None,
        };
        self.instances.insert(id.clone(), instance);
        &self.instances[&id]
    }

    /// Stores a fresh preview, replacing any previous one.
    ///
    /// May be called repeatedly before the instance is applied; each call
    /// overwrites rather than accumulates.
    pub fn store_outcome(
        &mut self,
        id: &InstanceId,
        tier: OutcomeTier,
        resolution: ResolutionOutcome,
        actor_name: &str,
        skill_name: &str,
    ) -> Result<(), CheckError> {
        let instance = self.get_mut(id)?;
        if instance.status == InstanceStatus::Applied {
            return Err(CheckError::AlreadyApplied(id.clone()));
        }
        instance.outcome = Some(AppliedOutcome {
            tier,
            actor_name: actor_name.to_string(),
            skill_name: skill_name.to_string(),
            message: resolution.message,
            modifiers: resolution.modifiers,
            manual_effects: resolution.manual_effects,
            special_effects: resolution.special_effects,
            effects_applied: false,
        });
        instance.status = InstanceStatus::Resolved;
        Ok(())
    }

    /// Marks a resolved instance applied. Returns false if it already was.
    pub fn mark_applied(&mut self, id: &InstanceId) -> Result<bool, CheckError> {
        let instance = self.get_mut(id)?;
        match instance.status {
            InstanceStatus::Applied => Ok(false),
            InstanceStatus::Pending => Err(CheckError::NoOutcome(id.clone())),
            InstanceStatus::Resolved => {
                instance.status = InstanceStatus::Applied;
                Ok(true)
            }
        }
    }

    /// Removes an instance regardless of status.
    pub fn clear_instance(&mut self, id: &InstanceId) -> Option<CheckInstance> {
        self.instances.remove(id)
    }

    /// Drops every instance. Only turn rollover calls this.
    pub(crate) fn clear_all(&mut self) {
        self.instances.clear();
    }

    pub fn get(&self, id: &InstanceId) -> Option<&CheckInstance> {
        self.instances.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &InstanceId) -> Result<&mut CheckInstance, CheckError> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| CheckError::MissingInstance(id.clone()))
    }

    /// Instances of `check_id`, in id order.
    pub fn find_by_check<'a>(
        &'a self,
        check_id: &'a str,
    ) -> impl Iterator<Item = &'a CheckInstance> + 'a {
        self.instances.values().filter(move |i| i.check_id == check_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckInstance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
