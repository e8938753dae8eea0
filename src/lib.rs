//! Regency engine library.
//!
//! Check resolution and turn-phase coordination for a cooperative
//! kingdom-management game. Exposes the kingdom ledger, check catalog and
//! registry, resolver, turn controller, client session and protocol modules
//! for use by integration tests and the binaries.

pub mod autoplay;
pub mod check;
pub mod engine;
pub mod error;
pub mod kingdom;
pub mod protocol;
pub mod resolve;
pub mod roll;
pub mod session;
pub mod transport;
pub mod turn;
