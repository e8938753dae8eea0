//! Resolution locks.
//!
//! A client resolving an instance stamps it with a `ResolutionProgress`
//! marker. Other clients treat a check carrying a foreign marker as
//! read-only until the marker clears. Replication is last-writer-wins, so
//! the marker narrows races rather than excluding them.

use super::registry::{CheckRegistry, InstanceId, ResolutionProgress};
use crate::error::CheckError;

/// Result of a successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Acquired,
    /// The caller already held the marker.
    AlreadyHeld,
}

/// Stamps `id` with the caller's marker.
///
/// Fails with `Conflict` if another player holds it.
pub fn claim(
    registry: &mut CheckRegistry,
    id: &InstanceId,
    player_id: &str,
    player_name: &str,
) -> Result<Claim, CheckError> {
    let instance = registry.get_mut(id)?;
    match &instance.progress {
        Some(p) if p.player_id == player_id => Ok(Claim::AlreadyHeld),
        Some(p) => Err(CheckError::Conflict {
            check_id: instance.check_id.clone(),
            holder: p.player_name.clone(),
        }),
        None => {
            instance.progress = Some(ResolutionProgress {
                player_id: player_id.to_string(),
                player_name: player_name.to_string(),
            });
            Ok(Claim::Acquired)
        }
    }
}

/// Clears the caller's marker from `id`. Returns false if the instance is
/// gone or the marker belongs to someone else.
pub fn release(registry: &mut CheckRegistry, id: &InstanceId, player_id: &str) -> bool {
    let Ok(instance) = registry.get_mut(id) else {
        return false;
    };
    match &instance.progress {
        Some(p) if p.player_id == player_id => {
            instance.progress = None;
            true
        }
        _ => false,
    }
}

/// Returns the marker of another player resolving any instance of `check_id`.
pub fn foreign_holder<'a>(
    registry: &'a CheckRegistry,
    check_id: &'a str,
    player_id: &str,
) -> Option<&'a ResolutionProgress> {
    registry
        .find_by_check(check_id)
        .filter_map(|i| i.progress.as_ref())
        .find(|p| p.player_id != player_id)
}
