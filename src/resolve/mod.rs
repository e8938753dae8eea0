//! Check resolution.
//!
//! Translates outcome tiers into effects, computes aid bonuses, and commits
//! resolved outcomes into the kingdom ledger.

pub mod aid;
pub mod apply;
pub mod outcome;

pub use aid::{aid_bonus, aid_dc, AidBonus, AidBook, AidRecord, ProficiencyRank};
pub use apply::{commit, CommitReport};
pub use outcome::{
    fill_placeholders, resolve_outcome, settlement_upgrade_cost, ResolutionOutcome,
    ResolveContext, SpecialEffect,
};
