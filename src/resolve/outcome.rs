//! Outcome → effect translation.
//!
//! `resolve_outcome` is a pure function from a check definition, an outcome
//! tier and the chosen targets to the message, numeric modifiers, manual
//! effects and special effects the tier produces. Nothing here touches the
//! ledger; the result is only a preview until it is committed.

use serde::{Deserialize, Serialize};

use crate::check::catalog::StructureDefinition;
use crate::check::definition::{CheckDefinition, CostScaling, OutcomeTier, SpecialTag};
use crate::kingdom::{half_rounded_up, Modifier, Settlement};

/// Noun substituted when a settlement placeholder has no bound name.
const GENERIC_SETTLEMENT: &str = "the settlement";
/// Noun substituted when a structure placeholder has no bound name.
const GENERIC_STRUCTURE: &str = "the structure";
/// Noun substituted for placeholders the resolver does not know.
const GENERIC_TARGET: &str = "the target";

/// A resolved effect that needs more than a resource delta to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum SpecialEffect {
    UpgradeSettlement {
        settlement_id: String,
    },
    QueueProject {
        structure_id: String,
        settlement_id: String,
        cost: Vec<Modifier>,
        /// Critical success halves total and remaining cost at commit.
        discounted: bool,
    },
}

/// The resolver's output for one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub message: String,
    pub modifiers: Vec<Modifier>,
    pub manual_effects: Vec<String>,
    pub special_effects: Vec<SpecialEffect>,
}

/// Targets and flags a resolution may depend on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveContext<'a> {
    pub settlement: Option<&'a Settlement>,
    pub structure: Option<&'a StructureDefinition>,
    /// Resolve as if the check were ignored rather than rolled.
    pub ignore: bool,
}

/// Cost of raising a settlement from `current_level` to the next level.
///
/// Full cost is the target level. Critical success and failure pay half,
/// rounded up; success and critical failure pay in full.
pub fn settlement_upgrade_cost(current_level: u32, tier: OutcomeTier) -> i32 {
    let full = current_level as i32 + 1;
    match tier {
        OutcomeTier::CriticalSuccess | OutcomeTier::Failure => half_rounded_up(full),
        OutcomeTier::Success | OutcomeTier::CriticalFailure => full,
    }
}

/// Translates `tier` of `def` into concrete effects.
pub fn resolve_outcome(
    def: &CheckDefinition,
    tier: OutcomeTier,
    ctx: &ResolveContext<'_>,
) -> ResolutionOutcome {
    let tier = if ctx.ignore { OutcomeTier::Failure } else { tier };
    let mut out = ResolutionOutcome::default();

    if !ctx.ignore {
        out.modifiers.extend(def.cost.iter().copied());
        if let (Some(CostScaling::SettlementUpgrade { resource }), Some(settlement)) =
            (def.scaling, ctx.settlement)
        {
            let cost = settlement_upgrade_cost(settlement.level, tier);
            out.modifiers.push(Modifier::new(resource, -cost));
        }
    }

    let effect = match def.outcomes.get(tier) {
        Some(e) => e,
        None => {
            out.message = if ctx.ignore {
                format!("{} was ignored.", def.name)
            } else {
                format!("{}: nothing happens.", def.name)
            };
            return out;
        }
    };

    out.message = fill_placeholders(&effect.message, ctx);
    out.modifiers.extend(effect.modifiers.iter().copied());
    out.manual_effects = effect
        .manual
        .iter()
        .map(|m| fill_placeholders(m, ctx))
        .collect();

    for tag in &effect.special {
        match (tag, ctx.settlement, ctx.structure) {
            (SpecialTag::UpgradeSettlement, Some(s), _) => {
                out.special_effects.push(SpecialEffect::UpgradeSettlement {
                    settlement_id: s.id.clone(),
                });
            }
            (SpecialTag::QueueStructure, Some(s), Some(st)) => {
                out.special_effects.push(SpecialEffect::QueueProject {
                    structure_id: st.id.clone(),
                    settlement_id: s.id.clone(),
                    cost: st.cost.clone(),
                    discounted: tier == OutcomeTier::CriticalSuccess,
                });
            }
            (SpecialTag::UpgradeSettlement, None, _) => {
                out.manual_effects.push("Raise a settlement by one level.".to_string());
            }
            (SpecialTag::QueueStructure, _, _) => {
                out.manual_effects.push("Queue a structure for construction.".to_string());
            }
        }
    }

    out
}

/// Replaces `{settlement}` and `{structure}` with the bound names.
/// Unbound or unknown placeholders become a generic noun.
pub fn fill_placeholders(template: &str, ctx: &ResolveContext<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        let value = match key {
            "settlement" => ctx
                .settlement
                .map(|s| s.name.as_str())
                .unwrap_or(GENERIC_SETTLEMENT),
            "structure" => ctx
                .structure
                .map(|s| s.name.as_str())
                .unwrap_or(GENERIC_STRUCTURE),
            _ => GENERIC_TARGET,
        };
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}
