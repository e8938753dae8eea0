//! Check definitions and outcome tiers.
//!
//! A `CheckDefinition` is immutable content supplied by the catalog. It names
//! the skills a check may use and describes, per outcome tier, the message,
//! numeric modifiers, manual effects and special effect tags the tier carries.

use serde::{Deserialize, Serialize};

use crate::kingdom::{Modifier, Resource};

/// Qualitative result of a skill check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeTier {
    CriticalSuccess,
    Success,
    Failure,
    CriticalFailure,
}

/// All tiers from best to worst.
pub const ALL_TIERS: [OutcomeTier; 4] = [
    OutcomeTier::CriticalSuccess,
    OutcomeTier::Success,
    OutcomeTier::Failure,
    OutcomeTier::CriticalFailure,
];

impl OutcomeTier {
    /// Returns the camelCase name used by the catalog and protocol.
    pub const fn name(self) -> &'static str {
        match self {
            OutcomeTier::CriticalSuccess => "criticalSuccess",
            OutcomeTier::Success => "success",
            OutcomeTier::Failure => "failure",
            OutcomeTier::CriticalFailure => "criticalFailure",
        }
    }

    /// Parses a tier from its name.
    pub fn from_name(s: &str) -> Option<OutcomeTier> {
        ALL_TIERS.iter().copied().find(|t| t.name() == s)
    }

    pub const fn is_success(self) -> bool {
        matches!(self, OutcomeTier::CriticalSuccess | OutcomeTier::Success)
    }

    /// One step better, saturating at critical success.
    pub const fn raised(self) -> OutcomeTier {
        match self {
            OutcomeTier::CriticalFailure => OutcomeTier::Failure,
            OutcomeTier::Failure => OutcomeTier::Success,
            _ => OutcomeTier::CriticalSuccess,
        }
    }

    /// One step worse, saturating at critical failure.
    pub const fn lowered(self) -> OutcomeTier {
        match self {
            OutcomeTier::CriticalSuccess => OutcomeTier::Success,
            OutcomeTier::Success => OutcomeTier::Failure,
            _ => OutcomeTier::CriticalFailure,
        }
    }
}

/// What kind of check a definition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Action,
    Event,
    Incident,
}

/// Effects that need more than a resource delta to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialTag {
    /// Raise the chosen settlement by one level.
    UpgradeSettlement,
    /// Put the chosen structure in the construction queue.
    QueueStructure,
}

/// Content for one outcome tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierEffect {
    pub message: String,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default)]
    pub manual: Vec<String>,
    #[serde(default)]
    pub special: Vec<SpecialTag>,
}

/// Per-tier content; any tier may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierEffects {
    #[serde(default)]
    pub critical_success: Option<TierEffect>,
    #[serde(default)]
    pub success: Option<TierEffect>,
    #[serde(default)]
    pub failure: Option<TierEffect>,
    #[serde(default)]
    pub critical_failure: Option<TierEffect>,
}

impl TierEffects {
    pub fn get(&self, tier: OutcomeTier) -> Option<&TierEffect> {
        match tier {
            OutcomeTier::CriticalSuccess => self.critical_success.as_ref(),
            OutcomeTier::Success => self.success.as_ref(),
            OutcomeTier::Failure => self.failure.as_ref(),
            OutcomeTier::CriticalFailure => self.critical_failure.as_ref(),
        }
    }
}

/// Preconditions checked before a roll and again before applying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Minimum stock that must be held, as positive amounts.
    #[serde(default)]
    pub min_resources: Vec<Modifier>,
    /// A settlement must be chosen before rolling.
    #[serde(default)]
    pub settlement: bool,
    /// A structure must be chosen before rolling.
    #[serde(default)]
    pub structure: bool,
}

/// Cost rules that depend on the chosen target rather than fixed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum CostScaling {
    /// Costs the settlement's target level in `resource`.
    SettlementUpgrade { resource: Resource },
}

/// Immutable description of a checkable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub id: String,
    pub name: String,
    pub kind: CheckKind,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub outcomes: TierEffects,
    /// Paid on commit for every rolled resolution.
    #[serde(default)]
    pub cost: Vec<Modifier>,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub scaling: Option<CostScaling>,
}

impl CheckDefinition {
    /// Returns true if `skill` may be used for this check. An empty skill list
    /// accepts any skill.
    pub fn allows_skill(&self, skill: &str) -> bool {
        self.skills.is_empty() || self.skills.iter().any(|s| s == skill)
    }
}
