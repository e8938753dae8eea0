//! Kingdom representation.
//!
//! Contains resources, settlements, the construction queue and the shared
//! `KingdomLedger` that owns turn state and in-flight checks.

pub mod ledger;
pub mod resource;
pub mod settlement;

pub use ledger::KingdomLedger;
pub use resource::{
    Modifier, RealizedDelta, Resource, ResourceStock, ALL_RESOURCES, RESOURCE_COUNT,
};
pub use settlement::{half_rounded_up, BuildProject, Settlement};
