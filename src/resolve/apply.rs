//! Committing resolved outcomes into the ledger.
//!
//! `commit` applies an applied instance's modifiers and special effects
//! exactly once. Resources are floored at zero, so the realized deltas it
//! returns may be smaller than those requested. Every precondition is checked
//! before the first write: a failed commit leaves the ledger untouched.

use serde::Serialize;
use tracing::{debug, error};

use super::outcome::SpecialEffect;
use crate::check::{InstanceId, InstanceStatus};
use crate::error::CheckError;
use crate::kingdom::{KingdomLedger, RealizedDelta};

/// What a commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub deltas: Vec<RealizedDelta>,
    /// (settlement id, new level) for each upgrade.
    pub upgraded: Vec<(String, u32)>,
    /// Ids of queued construction projects.
    pub queued: Vec<String>,
}

/// Commits the outcome stored on `id`.
///
/// Requires the instance to be `Applied` with effects not yet applied. A
/// second commit of the same instance is rejected with `AlreadyCommitted`
/// and changes nothing.
pub fn commit(ledger: &mut KingdomLedger, id: &InstanceId) -> Result<CommitReport, CheckError> {
    let instance = ledger
        .checks()
        .get(id)
        .ok_or_else(|| CheckError::MissingInstance(id.clone()))?;
    if instance.status != InstanceStatus::Applied {
        return Err(CheckError::NotApplied(id.clone()));
    }
    let outcome = instance
        .outcome
        .as_ref()
        .ok_or_else(|| CheckError::NoOutcome(id.clone()))?;
    if outcome.effects_applied {
        return Err(CheckError::AlreadyCommitted(id.clone()));
    }

    for effect in &outcome.special_effects {
        let settlement_id = match effect {
            SpecialEffect::UpgradeSettlement { settlement_id } => settlement_id,
            SpecialEffect::QueueProject { settlement_id, .. } => settlement_id,
        };
        if ledger.settlement(settlement_id).is_none() {
            error!(instance = %id, settlement = %settlement_id, "commit aborted: settlement missing");
            return Err(CheckError::MissingSettlement(settlement_id.clone()));
        }
    }

    let modifiers = outcome.modifiers.clone();
    let specials = outcome.special_effects.clone();

    let mut report = CommitReport::default();
    for m in &modifiers {
        let applied = ledger.adjust_resource(m.resource, m.value);
        report.deltas.push(RealizedDelta {
            resource: m.resource,
            requested: m.value,
            applied,
        });
    }

    for effect in &specials {
        match effect {
            SpecialEffect::UpgradeSettlement { settlement_id } => {
                let level = ledger.upgrade_settlement(settlement_id)?;
                report.upgraded.push((settlement_id.clone(), level));
            }
            SpecialEffect::QueueProject {
                structure_id,
                settlement_id,
                cost,
                discounted,
            } => {
                let project = ledger.queue_project(structure_id, settlement_id, cost, *discounted)?;
                report.queued.push(project);
            }
        }
    }

    if let Ok(instance) = ledger.checks_mut().get_mut(id) {
        if let Some(outcome) = instance.outcome.as_mut() {
            outcome.effects_applied = true;
        }
    }
    debug!(instance = %id, deltas = report.deltas.len(), "outcome committed");
    Ok(report)
}
