//! Roll services and the session roll channel.
//!
//! The engine does not roll dice itself. It sends a `RollRequest` to a
//! `RollService`, which answers later with a `RollEvent` on the session's
//! `RollChannel`. The channel only delivers events for keys the session is
//! subscribed to, so a cancelled check never sees its late outcome.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::check::OutcomeTier;

/// Why a roll was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollPurpose {
    /// The check itself.
    Primary,
    /// An aid check against the target check.
    Aid,
}

/// Identifies which pending roll an event answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RollKey {
    pub check_id: String,
    pub player_id: String,
    pub purpose: RollPurpose,
}

impl RollKey {
    pub fn primary(check_id: &str, player_id: &str) -> Self {
        Self {
            check_id: check_id.to_string(),
            player_id: player_id.to_string(),
            purpose: RollPurpose::Primary,
        }
    }

    pub fn aid(check_id: &str, player_id: &str) -> Self {
        Self {
            check_id: check_id.to_string(),
            player_id: player_id.to_string(),
            purpose: RollPurpose::Aid,
        }
    }
}

/// A request for a skill check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollRequest {
    pub key: RollKey,
    pub actor_name: String,
    pub skill: String,
    pub label: String,
    pub dc: u32,
    /// Character's own modifier for the skill.
    pub modifier: i32,
    /// Sum of aid bonuses picked up by the roll.
    pub aid_bonus: i32,
    /// Roll twice and keep the higher die.
    pub keep_higher: bool,
}

/// The answer to a `RollRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollEvent {
    pub key: RollKey,
    pub tier: OutcomeTier,
    pub actor_name: String,
    pub skill_name: String,
    pub natural: u32,
    pub total: i32,
}

pub type RollSender = Sender<RollEvent>;

/// Anything that can turn a roll request into an outcome event.
pub trait RollService: Send {
    /// Starts a check. The outcome is delivered on `reply`, possibly later.
    fn perform_check(&mut self, request: RollRequest, reply: RollSender);
}

/// Degree of success for `total` against `dc`, shifted one step by a
/// natural 20 or a natural 1.
pub fn degree_of_success(total: i32, dc: u32, natural: u32) -> OutcomeTier {
    let dc = dc as i32;
    let base = if total >= dc + 10 {
        OutcomeTier::CriticalSuccess
    } else if total >= dc {
        OutcomeTier::Success
    } else if total <= dc - 10 {
        OutcomeTier::CriticalFailure
    } else {
        OutcomeTier::Failure
    };
    match natural {
        20 => base.raised(),
        1 => base.lowered(),
        _ => base,
    }
}

/// d20 roller backed by a small seeded RNG.
pub struct DiceRoller {
    rng: SmallRng,
}

impl DiceRoller {
    /// Seeded roller; a seed of 0 draws from entropy.
    pub fn new(seed: u64) -> Self {
        let rng = if seed != 0 {
            SmallRng::seed_from_u64(seed)
        } else {
            SmallRng::from_entropy()
        };
        DiceRoller { rng }
    }
}

impl RollService for DiceRoller {
    fn perform_check(&mut self, request: RollRequest, reply: RollSender) {
        let mut natural = self.rng.gen_range(1..=20u32);
        if request.keep_higher {
            natural = natural.max(self.rng.gen_range(1..=20u32));
        }
        let total = natural as i32 + request.modifier + request.aid_bonus;
        let tier = degree_of_success(total, request.dc, natural);
        debug!(label = %request.label, natural, total, dc = request.dc, tier = tier.name(), "rolled");
        let event = RollEvent {
            key: request.key,
            tier,
            actor_name: request.actor_name,
            skill_name: request.skill,
            natural,
            total,
        };
        if reply.send(event).is_err() {
            debug!("roll channel closed before outcome delivery");
        }
    }
}

/// Always answers with the same tier. Used for scripted play and tests.
pub struct FixedRoller {
    pub tier: OutcomeTier,
}

impl RollService for FixedRoller {
    fn perform_check(&mut self, request: RollRequest, reply: RollSender) {
        let _ = reply.send(RollEvent {
            key: request.key,
            tier: self.tier,
            actor_name: request.actor_name,
            skill_name: request.skill,
            natural: 10,
            total: 10 + request.modifier + request.aid_bonus,
        });
    }
}

/// Session-scoped queue of roll outcomes.
pub struct RollChannel {
    tx: RollSender,
    rx: Receiver<RollEvent>,
    subscriptions: HashSet<RollKey>,
}

impl RollChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        RollChannel {
            tx,
            rx,
            subscriptions: HashSet::new(),
        }
    }

    /// Sender handed to roll services.
    pub fn sender(&self) -> RollSender {
        self.tx.clone()
    }

    /// Waits for the outcome keyed by `key`.
    pub fn subscribe(&mut self, key: RollKey) {
        self.subscriptions.insert(key);
    }

    /// Stops waiting for `key`; a later event for it is dropped.
    pub fn unsubscribe(&mut self, key: &RollKey) -> bool {
        self.subscriptions.remove(key)
    }

    pub fn is_subscribed(&self, key: &RollKey) -> bool {
        self.subscriptions.contains(key)
    }

    /// Takes every queued event with a live subscription, in arrival order.
    /// Each delivered event ends its subscription.
    pub fn drain(&mut self) -> Vec<RollEvent> {
        let mut delivered = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if self.subscriptions.remove(&event.key) {
                delivered.push(event);
            } else {
                debug!(check = %event.key.check_id, "dropping roll outcome with no subscriber");
            }
        }
        delivered
    }
}

impl Default for RollChannel {
    fn default() -> Self {
        Self::new()
    }
}
