//! Checks: content definitions, the catalog, in-flight instances and their
//! resolution locks.

pub mod catalog;
pub mod definition;
pub mod guard;
pub mod registry;

pub use catalog::{
    builtin_catalog, load_catalog, load_catalog_from_str, Catalog, CatalogError,
    StructureDefinition,
};
pub use definition::{
    CheckDefinition, CheckKind, CostScaling, OutcomeTier, Requirements, SpecialTag, TierEffect,
    TierEffects, ALL_TIERS,
};
pub use guard::{claim, foreign_holder, release, Claim};
pub use registry::{
    AppliedOutcome, CheckInstance, CheckRegistry, InstanceId, InstanceStatus, ResolutionProgress,
};
