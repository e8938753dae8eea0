//! Client session.
//!
//! A `Session` is one client's view of the game: it turns UI intents into
//! mutator calls on the shared ledger, keeps the client-local map from check
//! id to in-flight instance, and consumes roll outcomes from its own roll
//! channel. Within a session, operations on one instance run strictly in
//! order: create → store → mark applied → commit → clear.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::check::{
    self, AppliedOutcome, Catalog, CheckDefinition, CheckKind, CostScaling, InstanceId,
    InstanceStatus, OutcomeTier,
};
use crate::error::CheckError;
use crate::kingdom::{KingdomLedger, Modifier};
use crate::resolve::{
    aid_bonus, aid_dc, commit, resolve_outcome, settlement_upgrade_cost, AidRecord, CommitReport,
    ProficiencyRank, ResolutionOutcome, ResolveContext,
};
use crate::roll::{RollChannel, RollEvent, RollKey, RollPurpose, RollRequest, RollService};
use crate::transport::LedgerTransport;
use crate::turn::{self, ActionGate, TurnError, TurnPhase, ACTIONS_PER_TURN, ACTION_ECONOMY_PHASES};

/// Metadata key holding the chosen settlement id.
pub const META_SETTLEMENT: &str = "settlement";
/// Metadata key holding the chosen structure id.
pub const META_STRUCTURE: &str = "structure";

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The character a client plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub level: u32,
    /// Modifier added to every skill roll the character makes.
    pub skill_modifier: i32,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>, level: u32) -> Self {
        Player {
            id: id.into(),
            name: name.into(),
            level,
            skill_modifier: 0,
        }
    }
}

/// The phase in which checks of `kind` are resolved.
pub fn required_phase(kind: CheckKind) -> TurnPhase {
    match kind {
        CheckKind::Action => TurnPhase::Actions,
        CheckKind::Event => TurnPhase::Events,
        CheckKind::Incident => TurnPhase::Unrest,
    }
}

/// Result of a start-check intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// An instance was created and its roll requested.
    Rolling(InstanceId),
    /// This client already had the check in flight.
    Resumed(InstanceId),
    /// The player already acted this turn; resend with confirmation.
    NeedsConfirmation { taken: usize, allowance: usize },
}

/// Something that happened while draining roll outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Preview {
        check_id: String,
        instance_id: InstanceId,
        outcome: AppliedOutcome,
    },
    AidStored {
        target_check_id: String,
        tier: OutcomeTier,
        bonus: i32,
        keep_higher: bool,
    },
    /// Aid failed without effect; the player may try again.
    AidFailed { target_check_id: String },
    /// The outcome arrived for an instance that no longer exists.
    Dropped { check_id: String, reason: String },
}

/// Aid summary shown on a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AidSummary {
    pub bonus: i32,
    pub keep_higher: bool,
    pub helpers: Vec<String>,
}

/// What the UI needs to draw one visible check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckView {
    pub instance_id: InstanceId,
    pub check_id: String,
    pub status: InstanceStatus,
    pub preview: Option<AppliedOutcome>,
    pub aid: Option<AidSummary>,
    pub missing_requirements: Vec<String>,
    /// Display name of another client resolving this check.
    pub locked_by: Option<String>,
    /// True if this client owns the instance.
    pub mine: bool,
}

#[derive(Debug, Clone)]
struct LocalCheck {
    instance_id: InstanceId,
    skill: String,
    ignored: bool,
}

#[derive(Debug, Clone)]
struct PendingAid {
    skill: String,
    rank: ProficiencyRank,
    /// Turn and phase the aid was requested in. The outcome only counts there.
    turn: u32,
    phase: TurnPhase,
}

/// One client's handle on the shared game.
pub struct Session<T: LedgerTransport> {
    player: Player,
    transport: T,
    catalog: Arc<Catalog>,
    roller: Box<dyn RollService>,
    rolls: RollChannel,
    local: HashMap<String, LocalCheck>,
    pending_aids: HashMap<String, PendingAid>,
    next_seq: u64,
    allowance: usize,
    clock: fn() -> u64,
}

impl<T: LedgerTransport> Session<T> {
    pub fn new(
        player: Player,
        transport: T,
        catalog: Arc<Catalog>,
        roller: Box<dyn RollService>,
    ) -> Self {
        Session {
            player,
            transport,
            catalog,
            roller,
            rolls: RollChannel::new(),
            local: HashMap::new(),
            pending_aids: HashMap::new(),
            next_seq: 1,
            allowance: ACTIONS_PER_TURN,
            clock: now_millis,
        }
    }

    /// Overrides the per-turn action allowance reported in confirmations.
    pub fn with_allowance(mut self, allowance: usize) -> Self {
        self.allowance = allowance;
        self
    }

    /// Overrides the timestamp source.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the roll service for subsequent rolls.
    pub fn set_roller(&mut self, roller: Box<dyn RollService>) {
        self.roller = roller;
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The freshest ledger snapshot this client holds.
    pub fn ledger(&mut self) -> &KingdomLedger {
        self.transport.read()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Instance this client has in flight for `check_id`.
    pub fn local_instance(&self, check_id: &str) -> Option<&InstanceId> {
        self.local.get(check_id).map(|l| &l.instance_id)
    }

    fn definition(&self, check_id: &str) -> Result<CheckDefinition, CheckError> {
        self.catalog
            .check(check_id)
            .cloned()
            .ok_or_else(|| CheckError::MissingDefinition(check_id.to_string()))
    }

    /// Begins a check: validates, creates and claims an instance, and
    /// requests the roll.
    pub fn start_check(
        &mut self,
        check_id: &str,
        skill: &str,
        metadata: BTreeMap<String, String>,
        confirmed: bool,
    ) -> Result<StartOutcome, CheckError> {
        let def = self.definition(check_id)?;
        if !def.allows_skill(skill) {
            return Err(CheckError::SkillNotAllowed {
                check_id: check_id.to_string(),
                skill: skill.to_string(),
            });
        }

        if let Some(existing) = self.local.get(check_id) {
            let id = existing.instance_id.clone();
            if self.transport.read().checks().get(&id).is_some() {
                return Ok(StartOutcome::Resumed(id));
            }
            self.local.remove(check_id);
        }

        let phase = required_phase(def.kind);
        let gate = {
            let ledger = self.transport.read();
            if !turn::is_viewing_current_phase(ledger, phase) {
                return Err(CheckError::WrongPhase {
                    check_id: check_id.to_string(),
                    expected: phase,
                });
            }
            if let Some(holder) = check::foreign_holder(ledger.checks(), check_id, &self.player.id) {
                warn!(check = check_id, holder = %holder.player_name, "check is being resolved elsewhere");
                return Err(CheckError::Conflict {
                    check_id: check_id.to_string(),
                    holder: holder.player_name.clone(),
                });
            }
            let missing = missing_requirements(&def, ledger, &self.catalog, &metadata, None);
            if !missing.is_empty() {
                return Err(CheckError::Validation(missing));
            }
            ledger.turn_state().action_log.gate(&self.player.id, self.allowance)
        };

        if ACTION_ECONOMY_PHASES.contains(&phase) && !confirmed {
            if let ActionGate::NeedsConfirmation { taken, allowance } = gate {
                return Ok(StartOutcome::NeedsConfirmation { taken, allowance });
            }
        }

        let id = self.create_claimed(&def, metadata)?;
        self.local.insert(
            check_id.to_string(),
            LocalCheck {
                instance_id: id.clone(),
                skill: skill.to_string(),
                ignored: false,
            },
        );

        let aid = self.transport.read().turn_state().aids.bonus_for(check_id);
        let key = RollKey::primary(check_id, &self.player.id);
        self.rolls.subscribe(key.clone());
        let request = RollRequest {
            key,
            actor_name: self.player.name.clone(),
            skill: skill.to_string(),
            label: def.name.clone(),
            dc: aid_dc(self.player.level),
            modifier: self.player.skill_modifier,
            aid_bonus: aid.bonus,
            keep_higher: aid.keep_higher,
        };
        self.roller.perform_check(request, self.rolls.sender());
        info!(player = %self.player.id, check = check_id, instance = %id, "check started");
        Ok(StartOutcome::Rolling(id))
    }

    fn create_claimed(
        &mut self,
        def: &CheckDefinition,
        metadata: BTreeMap<String, String>,
    ) -> Result<InstanceId, CheckError> {
        let id = InstanceId(format!("{}-{}", self.player.id, self.next_seq));
        self.next_seq += 1;
        let player_id = self.player.id.clone();
        let player_name = self.player.name.clone();
        let kind = def.kind;
        let check_id = def.id.clone();
        let created = id.clone();
        self.transport.update("create_instance", move |l| {
            let turn = l.turn_state().turn;
            l.checks_mut()
                .create_instance(created.clone(), kind, &check_id, turn, metadata);
            check::claim(l.checks_mut(), &created, &player_id, &player_name)?;
            Ok::<_, CheckError>(())
        })?;
        Ok(id)
    }

    /// Drains roll outcomes and turns them into previews and aid records.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let events = self.rolls.drain();
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            let result = match event.key.purpose {
                RollPurpose::Primary => self.on_primary_roll(event),
                RollPurpose::Aid => self.on_aid_roll(event),
            };
            match result {
                Ok(e) => out.push(e),
                Err((check_id, err)) => {
                    error!(check = %check_id, error = %err, "roll outcome could not be stored");
                    out.push(SessionEvent::Dropped {
                        check_id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        out
    }

    fn on_primary_roll(&mut self, event: RollEvent) -> Result<SessionEvent, (String, CheckError)> {
        let check_id = event.key.check_id.clone();
        let fail = |e: CheckError| (check_id.clone(), e);
        let Some(local) = self.local.get(&check_id).cloned() else {
            return Err(fail(CheckError::NotInProgress(check_id.clone())));
        };
        let def = self.definition(&check_id).map_err(fail)?;
        let resolution = {
            let ledger = self.transport.read();
            ledger.checks().get(&local.instance_id).map(|instance| {
                let ctx = context_for(ledger, &self.catalog, &instance.metadata, false);
                resolve_outcome(&def, event.tier, &ctx)
            })
        };
        let Some(resolution) = resolution else {
            self.local.remove(&check_id);
            return Err(fail(CheckError::MissingInstance(local.instance_id)));
        };
        let outcome = self
            .store(&local.instance_id, &check_id, event.tier, resolution, &event.actor_name, &event.skill_name)
            .map_err(|e| {
                if matches!(e, CheckError::MissingInstance(_)) {
                    self.local.remove(&check_id);
                }
                fail(e)
            })?;
        Ok(SessionEvent::Preview {
            check_id,
            instance_id: local.instance_id,
            outcome,
        })
    }

    /// Stores a preview and purges aid records for the check, as one update.
    fn store(
        &mut self,
        id: &InstanceId,
        check_id: &str,
        tier: OutcomeTier,
        resolution: ResolutionOutcome,
        actor_name: &str,
        skill_name: &str,
    ) -> Result<AppliedOutcome, CheckError> {
        let outcome = self.transport.update("store_outcome", |l| {
            l.checks_mut()
                .store_outcome(id, tier, resolution, actor_name, skill_name)?;
            let purged = l.turn_state_mut().aids.purge_target(check_id);
            if purged > 0 {
                debug!(check = check_id, purged, "aid records consumed");
            }
            l.checks()
                .get(id)
                .and_then(|i| i.outcome.clone())
                .ok_or_else(|| CheckError::NoOutcome(id.clone()))
        })?;
        debug!(instance = %id, tier = tier.name(), "preview stored");
        Ok(outcome)
    }

    fn on_aid_roll(&mut self, event: RollEvent) -> Result<SessionEvent, (String, CheckError)> {
        let target = event.key.check_id.clone();
        let Some(pending) = self.pending_aids.remove(&target) else {
            return Err((target.clone(), CheckError::NotInProgress(target)));
        };
        let state = self.transport.read().turn_state();
        if state.turn != pending.turn || state.phase != pending.phase {
            let err = CheckError::StaleAid {
                check_id: target.clone(),
                turn: pending.turn,
                phase: pending.phase,
            };
            return Err((target, err));
        }
        let Some(bonus) = aid_bonus(event.tier, pending.rank) else {
            info!(player = %self.player.id, target = %target, "aid failed; may retry");
            return Ok(SessionEvent::AidFailed { target_check_id: target });
        };
        let record = AidRecord {
            player_id: self.player.id.clone(),
            character_name: event.actor_name.clone(),
            target_check_id: target.clone(),
            skill: pending.skill,
            tier: event.tier,
            bonus: bonus.bonus,
            keep_higher: bonus.keep_higher,
            timestamp: (self.clock)(),
        };
        let player_id = self.player.id.clone();
        let timestamp = record.timestamp;
        let target_for_log = target.clone();
        let phase = pending.phase;
        self.transport
            .update("store_aid", move |l| {
                let turn = l.turn_state_mut();
                turn.aids.store(record);
                turn.action_log
                    .record_action(&player_id, phase, &target_for_log, timestamp);
                Ok::<_, CheckError>(())
            })
            .map_err(|e| (target.clone(), e))?;
        Ok(SessionEvent::AidStored {
            target_check_id: target,
            tier: event.tier,
            bonus: bonus.bonus,
            keep_higher: bonus.keep_higher,
        })
    }

    /// Commits the previewed outcome of `check_id`, records the action, and
    /// clears the instance.
    pub fn apply_result(&mut self, check_id: &str) -> Result<CommitReport, CheckError> {
        let local = self
            .local
            .get(check_id)
            .cloned()
            .ok_or_else(|| CheckError::NotInProgress(check_id.to_string()))?;
        let def = self.definition(check_id)?;
        let phase = required_phase(def.kind);

        {
            let ledger = self.transport.read();
            let instance = ledger
                .checks()
                .get(&local.instance_id)
                .ok_or_else(|| CheckError::MissingInstance(local.instance_id.clone()))?;
            let outcome = instance
                .outcome
                .as_ref()
                .ok_or_else(|| CheckError::NoOutcome(local.instance_id.clone()))?;
            if !local.ignored {
                let missing = missing_requirements(
                    &def,
                    ledger,
                    &self.catalog,
                    &instance.metadata,
                    Some(outcome.tier),
                );
                if !missing.is_empty() {
                    warn!(check = check_id, ?missing, "apply rejected");
                    return Err(CheckError::Validation(missing));
                }
            }
        }

        let id = local.instance_id.clone();
        let player_id = self.player.id.clone();
        let records_action = !local.ignored && ACTION_ECONOMY_PHASES.contains(&phase);
        let timestamp = (self.clock)();
        let report = self.transport.update("apply_result", |l| {
            l.checks_mut().mark_applied(&id)?;
            let report = commit(l, &id)?;
            if records_action {
                l.turn_state_mut()
                    .action_log
                    .record_action(&player_id, phase, check_id, timestamp);
            }
            check::release(l.checks_mut(), &id, &player_id);
            l.checks_mut().clear_instance(&id);
            Ok::<_, CheckError>(report)
        });
        match &report {
            Ok(r) => {
                self.local.remove(check_id);
                info!(player = %self.player.id, check = check_id, deltas = r.deltas.len(), "result applied");
            }
            Err(e) if e.kind() == crate::error::ErrorKind::MissingEntity => {
                error!(check = check_id, error = %e, "apply failed");
            }
            Err(e) => warn!(check = check_id, error = %e, "apply failed"),
        }
        report
    }

    /// Abandons `check_id` before commit. Never touches resources or the
    /// action log.
    pub fn cancel(&mut self, check_id: &str) -> Result<(), CheckError> {
        let local = self
            .local
            .remove(check_id)
            .ok_or_else(|| CheckError::NotInProgress(check_id.to_string()))?;
        self.rolls
            .unsubscribe(&RollKey::primary(check_id, &self.player.id));
        let id = local.instance_id;
        let player_id = self.player.id.clone();
        let present = self.transport.read().checks().get(&id).is_some();
        if present {
            self.transport.update("cancel_check", |l| {
                check::release(l.checks_mut(), &id, &player_id);
                l.checks_mut().clear_instance(&id);
                Ok::<_, CheckError>(())
            })?;
        }
        info!(player = %self.player.id, check = check_id, "check cancelled");
        Ok(())
    }

    /// Resolves `check_id` as ignored: the failure tier's effects, no roll.
    /// The preview still has to be applied.
    pub fn ignore(
        &mut self,
        check_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<AppliedOutcome, CheckError> {
        let def = self.definition(check_id)?;
        let phase = required_phase(def.kind);
        {
            let ledger = self.transport.read();
            if !turn::is_viewing_current_phase(ledger, phase) {
                return Err(CheckError::WrongPhase {
                    check_id: check_id.to_string(),
                    expected: phase,
                });
            }
            if let Some(holder) = check::foreign_holder(ledger.checks(), check_id, &self.player.id) {
                return Err(CheckError::Conflict {
                    check_id: check_id.to_string(),
                    holder: holder.player_name.clone(),
                });
            }
        }

        let id = match self.local.get(check_id) {
            Some(l) => l.instance_id.clone(),
            None => self.create_claimed(&def, metadata)?,
        };
        self.rolls
            .unsubscribe(&RollKey::primary(check_id, &self.player.id));
        self.local.insert(
            check_id.to_string(),
            LocalCheck {
                instance_id: id.clone(),
                skill: "ignored".to_string(),
                ignored: true,
            },
        );

        let resolution = {
            let ledger = self.transport.read();
            let instance = ledger
                .checks()
                .get(&id)
                .ok_or_else(|| CheckError::MissingInstance(id.clone()))?;
            let ctx = context_for(ledger, &self.catalog, &instance.metadata, true);
            resolve_outcome(&def, OutcomeTier::Failure, &ctx)
        };
        let actor = self.player.name.clone();
        self.store(&id, check_id, OutcomeTier::Failure, resolution, &actor, "ignored")
    }

    /// Requests an aid roll against another player's check.
    pub fn request_aid(
        &mut self,
        target_check_id: &str,
        skill: &str,
        rank: ProficiencyRank,
    ) -> Result<(), CheckError> {
        let def = self.definition(target_check_id)?;
        let phase = required_phase(def.kind);
        if !turn::is_viewing_current_phase(self.transport.read(), phase) {
            return Err(CheckError::WrongPhase {
                check_id: target_check_id.to_string(),
                expected: phase,
            });
        }
        let turn = self.transport.read().turn_state().turn;
        let key = RollKey::aid(target_check_id, &self.player.id);
        self.rolls.subscribe(key.clone());
        self.pending_aids.insert(
            target_check_id.to_string(),
            PendingAid {
                skill: skill.to_string(),
                rank,
                turn,
                phase,
            },
        );
        let request = RollRequest {
            key,
            actor_name: self.player.name.clone(),
            skill: skill.to_string(),
            label: format!("Aid: {}", def.name),
            dc: aid_dc(self.player.level),
            modifier: self.player.skill_modifier,
            aid_bonus: 0,
            keep_higher: false,
        };
        self.roller.perform_check(request, self.rolls.sender());
        debug!(player = %self.player.id, target = target_check_id, "aid requested");
        Ok(())
    }

    /// Replaces the preview of `check_id` with the effects of `tier`.
    pub fn debug_override(
        &mut self,
        check_id: &str,
        tier: OutcomeTier,
    ) -> Result<AppliedOutcome, CheckError> {
        let local = self
            .local
            .get(check_id)
            .cloned()
            .ok_or_else(|| CheckError::NotInProgress(check_id.to_string()))?;
        if local.ignored {
            return Err(CheckError::IgnoredOverride(check_id.to_string()));
        }
        let def = self.definition(check_id)?;
        self.rolls
            .unsubscribe(&RollKey::primary(check_id, &self.player.id));
        let (resolution, actor, skill) = {
            let ledger = self.transport.read();
            let instance = ledger
                .checks()
                .get(&local.instance_id)
                .ok_or_else(|| CheckError::MissingInstance(local.instance_id.clone()))?;
            let ctx = context_for(ledger, &self.catalog, &instance.metadata, false);
            let (actor, skill) = match &instance.outcome {
                Some(o) => (o.actor_name.clone(), o.skill_name.clone()),
                None => (self.player.name.clone(), local.skill.clone()),
            };
            (resolve_outcome(&def, tier, &ctx), actor, skill)
        };
        warn!(player = %self.player.id, check = check_id, tier = tier.name(), "outcome overridden");
        self.store(&local.instance_id, check_id, tier, resolution, &actor, &skill)
    }

    /// Per-check state for the UI.
    pub fn views(&mut self) -> Vec<CheckView> {
        let player_id = self.player.id.clone();
        let catalog = Arc::clone(&self.catalog);
        let ledger = self.transport.read();
        ledger
            .checks()
            .iter()
            .map(|instance| {
                let missing = catalog
                    .check(&instance.check_id)
                    .map(|def| {
                        let tier = instance.outcome.as_ref().map(|o| o.tier);
                        missing_requirements(def, ledger, &catalog, &instance.metadata, tier)
                    })
                    .unwrap_or_else(|| vec![format!("unknown check '{}'", instance.check_id)]);
                let aids: Vec<&AidRecord> = ledger
                    .turn_state()
                    .aids
                    .for_target(&instance.check_id)
                    .collect();
                let aid = (!aids.is_empty()).then(|| {
                    let total = ledger.turn_state().aids.bonus_for(&instance.check_id);
                    AidSummary {
                        bonus: total.bonus,
                        keep_higher: total.keep_higher,
                        helpers: aids.iter().map(|r| r.character_name.clone()).collect(),
                    }
                });
                let holder = instance.progress.as_ref();
                CheckView {
                    instance_id: instance.id.clone(),
                    check_id: instance.check_id.clone(),
                    status: instance.status,
                    preview: instance.outcome.clone(),
                    aid,
                    missing_requirements: missing,
                    locked_by: holder
                        .filter(|p| p.player_id != player_id)
                        .map(|p| p.player_name.clone()),
                    mine: holder.map(|p| p.player_id == player_id).unwrap_or(false),
                }
            })
            .collect()
    }

    /// Marks a step complete on the shared ledger.
    pub fn complete_step(&mut self, phase: TurnPhase, index: usize) {
        let _ = self.transport.update("complete_step", |l| {
            turn::start_phase(l, phase);
            turn::complete_step(l, phase, index);
            Ok::<_, ()>(())
        });
    }

    /// Advances the shared ledger to the next phase.
    pub fn advance_phase(&mut self) -> Result<TurnPhase, TurnError> {
        self.transport.update("advance_phase", turn::advance_phase)
    }

    /// Records an event roll; returns true if an event triggers.
    pub fn record_event_roll(&mut self, roll: u32) -> bool {
        self.transport
            .update("record_event_roll", |l| Ok::<_, ()>(turn::record_event_roll(l, roll)))
            .unwrap_or(false)
    }

    /// Runs the upkeep construction step.
    pub fn process_build_queue(&mut self) -> Vec<String> {
        self.transport
            .update("process_build_queue", |l| Ok::<_, ()>(turn::process_build_queue(l)))
            .unwrap_or_default()
    }

    /// Ends the turn for everyone and drops this client's local state.
    pub fn end_turn(&mut self) -> u32 {
        self.local.clear();
        self.pending_aids.clear();
        self.transport
            .update("end_turn", |l| Ok::<_, ()>(turn::end_turn(l)))
            .unwrap_or(0)
    }
}

/// Builds the resolver context from an instance's metadata.
fn context_for<'a>(
    ledger: &'a KingdomLedger,
    catalog: &'a Catalog,
    metadata: &BTreeMap<String, String>,
    ignore: bool,
) -> ResolveContext<'a> {
    ResolveContext {
        settlement: metadata
            .get(META_SETTLEMENT)
            .and_then(|id| ledger.settlement(id)),
        structure: metadata
            .get(META_STRUCTURE)
            .and_then(|id| catalog.structure(id)),
        ignore,
    }
}

/// Lists unmet requirements for `def` given the current ledger and the
/// pre-roll selections. With `tier` set, scaled costs are those of that tier;
/// otherwise the full cost is required.
pub fn missing_requirements(
    def: &CheckDefinition,
    ledger: &KingdomLedger,
    catalog: &Catalog,
    metadata: &BTreeMap<String, String>,
    tier: Option<OutcomeTier>,
) -> Vec<String> {
    let mut missing = Vec::new();
    let settlement = metadata.get(META_SETTLEMENT);
    let reqs = &def.requirements;

    if reqs.settlement || def.scaling.is_some() {
        match settlement {
            None => missing.push("choose a settlement".to_string()),
            Some(id) if ledger.settlement(id).is_none() => {
                missing.push(format!("unknown settlement '{}'", id))
            }
            Some(_) => {}
        }
    }
    if reqs.structure {
        match metadata.get(META_STRUCTURE) {
            None => missing.push("choose a structure".to_string()),
            Some(id) if catalog.structure(id).is_none() => {
                missing.push(format!("unknown structure '{}'", id))
            }
            Some(_) => {}
        }
    }

    for m in &reqs.min_resources {
        let have = ledger.resource(m.resource);
        if have < m.value {
            missing.push(format!("needs at least {} {} (have {})", m.value, m.resource.name(), have));
        }
    }

    let mut costs: Vec<Modifier> = def.cost.clone();
    if let (Some(CostScaling::SettlementUpgrade { resource }), Some(s)) =
        (def.scaling, settlement.and_then(|id| ledger.settlement(id)))
    {
        let cost = match tier {
            Some(t) => settlement_upgrade_cost(s.level, t),
            None => s.level as i32 + 1,
        };
        costs.push(Modifier::new(resource, -cost));
    }
    for (resource, short) in ledger.resources().shortfalls(&costs) {
        missing.push(format!("needs {} more {}", short, resource.name()));
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::builtin_catalog;
    use crate::error::ErrorKind;
    use crate::kingdom::{Resource, Settlement};
    use crate::roll::FixedRoller;
    use crate::transport::{LedgerHub, Replica};

    fn fixed_clock() -> u64 {
        1_000
    }

    fn hub_in_phase(phase: TurnPhase) -> LedgerHub {
        let mut ledger = KingdomLedger::new("Stolen Lands");
        ledger.add_settlement(Settlement::new("s1", "Tatzlford", 3));
        ledger.set_resource(Resource::Gold, 10);
        ledger.set_resource(Resource::Unrest, 4);
        turn::end_turn(&mut ledger);
        for p in crate::turn::ALL_PHASES {
            if p == phase {
                break;
            }
            for i in 0..p.step_count() {
                turn::complete_step(&mut ledger, p, i);
            }
            turn::advance_phase(&mut ledger).unwrap();
        }
        LedgerHub::new(ledger)
    }

    fn session(hub: &LedgerHub, id: &str, name: &str, tier: OutcomeTier) -> Session<Replica> {
        let catalog = Arc::new(builtin_catalog().unwrap());
        Session::new(
            Player::new(id, name, 1),
            hub.connect(),
            catalog,
            Box::new(FixedRoller { tier }),
        )
        .with_clock(fixed_clock)
    }

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn full_cycle_applies_and_records_action() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        let started = s
            .start_check("deal-with-unrest", "diplomacy", BTreeMap::new(), false)
            .unwrap();
        assert!(matches!(started, StartOutcome::Rolling(_)));

        let events = s.poll();
        assert!(matches!(&events[..], [SessionEvent::Preview { outcome, .. }] if outcome.tier == OutcomeTier::Success));

        let report = s.apply_result("deal-with-unrest").unwrap();
        assert_eq!(report.deltas[0].applied, -2);
        let ledger = s.ledger();
        assert_eq!(ledger.resource(Resource::Unrest), 2);
        assert!(ledger.checks().is_empty());
        assert!(ledger
            .turn_state()
            .action_log
            .has_acted("p1", &ACTION_ECONOMY_PHASES));
    }

    #[test]
    fn second_action_requires_confirmation() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        s.start_check("deal-with-unrest", "diplomacy", BTreeMap::new(), false)
            .unwrap();
        s.poll();
        s.apply_result("deal-with-unrest").unwrap();

        let gated = s
            .start_check("harvest-resources", "nature", BTreeMap::new(), false)
            .unwrap();
        assert_eq!(
            gated,
            StartOutcome::NeedsConfirmation { taken: 1, allowance: ACTIONS_PER_TURN }
        );
        assert!(s.ledger().checks().is_empty());
        let confirmed = s
            .start_check("harvest-resources", "nature", BTreeMap::new(), true)
            .unwrap();
        assert!(matches!(confirmed, StartOutcome::Rolling(_)));
    }

    #[test]
    fn cancel_restores_pre_create_snapshot() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::CriticalSuccess);
        let before = serde_json::to_vec(s.ledger()).unwrap();
        s.start_check("deal-with-unrest", "diplomacy", BTreeMap::new(), false)
            .unwrap();
        s.cancel("deal-with-unrest").unwrap();
        assert!(s.poll().is_empty());
        let after = serde_json::to_vec(s.ledger()).unwrap();
        assert_eq!(before, after);
        assert!(s.local_instance("deal-with-unrest").is_none());
    }

    #[test]
    fn cancel_after_preview_records_nothing() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::CriticalSuccess);
        let before = serde_json::to_vec(s.ledger()).unwrap();
        s.start_check("deal-with-unrest", "diplomacy", BTreeMap::new(), false)
            .unwrap();
        s.poll();
        s.cancel("deal-with-unrest").unwrap();
        assert_eq!(before, serde_json::to_vec(s.ledger()).unwrap());
    }

    #[test]
    fn foreign_lock_is_read_only() {
        let hub = hub_in_phase(TurnPhase::Events);
        let mut a = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        let mut b = session(&hub, "p2", "Ezren", OutcomeTier::Success);
        a.start_check("bandit-raid", "warfare", BTreeMap::new(), false)
            .unwrap();

        let err = b
            .start_check("bandit-raid", "warfare", BTreeMap::new(), false)
            .unwrap_err();
        assert_eq!(
            err,
            CheckError::Conflict { check_id: "bandit-raid".into(), holder: "Amiri".into() }
        );
        let views = b.views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].locked_by.as_deref(), Some("Amiri"));
        assert!(!views[0].mine);

        a.cancel("bandit-raid").unwrap();
        assert!(matches!(
            b.start_check("bandit-raid", "warfare", BTreeMap::new(), false),
            Ok(StartOutcome::Rolling(_))
        ));
    }

    #[test]
    fn wrong_phase_is_validation() {
        let hub = hub_in_phase(TurnPhase::Events);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        let err = s
            .start_check("deal-with-unrest", "diplomacy", BTreeMap::new(), false)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn missing_selection_is_reported_without_mutation() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        let before = s.ledger().clone();
        let err = s
            .start_check("upgrade-settlement", "industry", BTreeMap::new(), false)
            .unwrap_err();
        assert_eq!(err, CheckError::Validation(vec!["choose a settlement".into()]));
        assert_eq!(s.ledger(), &before);
    }

    #[test]
    fn settlement_upgrade_failure_pays_half() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Failure);
        s.start_check("upgrade-settlement", "industry", meta(&[("settlement", "s1")]), false)
            .unwrap();
        s.poll();
        s.apply_result("upgrade-settlement").unwrap();
        let ledger = s.ledger();
        assert_eq!(ledger.resource(Resource::Gold), 8);
        assert_eq!(ledger.settlement("s1").unwrap().level, 3);
    }

    #[test]
    fn insufficient_gold_keeps_instance() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        s.start_check("upgrade-settlement", "industry", meta(&[("settlement", "s1")]), false)
            .unwrap();
        s.poll();
        // Someone spends the treasury while the preview is up.
        s.transport_mut()
            .update("spend", |l| {
                l.set_resource(Resource::Gold, 1);
                Ok::<_, ()>(())
            })
            .unwrap();
        let err = s.apply_result("upgrade-settlement").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        let ledger = s.ledger();
        assert_eq!(ledger.checks().len(), 1);
        assert!(ledger.turn_state().action_log.is_empty());
        assert!(s.local_instance("upgrade-settlement").is_some());
    }

    #[test]
    fn aid_bonus_is_consumed_by_target_roll() {
        let hub = hub_in_phase(TurnPhase::Events);
        let mut helper = session(&hub, "p2", "Ezren", OutcomeTier::CriticalSuccess);
        let mut actor = session(&hub, "p1", "Amiri", OutcomeTier::Success);

        helper.request_aid("bandit-raid", "diplomacy", 0).unwrap();
        let events = helper.poll();
        assert_eq!(
            events,
            vec![SessionEvent::AidStored {
                target_check_id: "bandit-raid".into(),
                tier: OutcomeTier::CriticalSuccess,
                bonus: 4,
                keep_higher: true,
            }]
        );
        assert!(helper
            .ledger()
            .turn_state()
            .action_log
            .has_acted("p2", &ACTION_ECONOMY_PHASES));

        actor
            .start_check("bandit-raid", "warfare", BTreeMap::new(), false)
            .unwrap();
        let view = actor.views().pop().unwrap();
        assert_eq!(view.aid.as_ref().map(|a| a.bonus), Some(4));
        actor.poll();
        assert!(actor.ledger().turn_state().aids.is_empty());
    }

    #[test]
    fn failed_aid_stores_nothing() {
        let hub = hub_in_phase(TurnPhase::Events);
        let mut helper = session(&hub, "p2", "Ezren", OutcomeTier::Failure);
        helper.request_aid("bandit-raid", "diplomacy", 2).unwrap();
        assert_eq!(
            helper.poll(),
            vec![SessionEvent::AidFailed { target_check_id: "bandit-raid".into() }]
        );
        let ledger = helper.ledger();
        assert!(ledger.turn_state().aids.is_empty());
        assert!(ledger.turn_state().action_log.is_empty());
    }

    #[test]
    fn ignore_resolves_as_failure_without_action() {
        let hub = hub_in_phase(TurnPhase::Events);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::CriticalSuccess);
        let preview = s.ignore("bandit-raid", BTreeMap::new()).unwrap();
        assert_eq!(preview.tier, OutcomeTier::Failure);
        assert_eq!(preview.modifiers, vec![Modifier::new(Resource::Gold, -2)]);
        s.apply_result("bandit-raid").unwrap();
        let ledger = s.ledger();
        assert_eq!(ledger.resource(Resource::Gold), 8);
        assert!(ledger.turn_state().action_log.is_empty());
    }

    #[test]
    fn debug_override_replaces_preview() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::CriticalFailure);
        s.start_check("deal-with-unrest", "diplomacy", BTreeMap::new(), false)
            .unwrap();
        s.poll();
        let preview = s
            .debug_override("deal-with-unrest", OutcomeTier::CriticalSuccess)
            .unwrap();
        assert_eq!(preview.tier, OutcomeTier::CriticalSuccess);
        assert_eq!(preview.actor_name, "Amiri");
        assert_eq!(preview.skill_name, "diplomacy");
        s.apply_result("deal-with-unrest").unwrap();
        assert_eq!(s.ledger().resource(Resource::Unrest), 1);
    }

    #[test]
    fn ignored_check_keeps_its_failure_preview() {
        let hub = hub_in_phase(TurnPhase::Events);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        s.ignore("bandit-raid", BTreeMap::new()).unwrap();
        let before = s.ledger().clone();
        assert_eq!(
            s.debug_override("bandit-raid", OutcomeTier::CriticalSuccess),
            Err(CheckError::IgnoredOverride("bandit-raid".into()))
        );
        assert_eq!(s.ledger(), &before);
        s.apply_result("bandit-raid").unwrap();
        assert_eq!(s.ledger().resource(Resource::Gold), 8);
    }

    #[test]
    fn aid_landing_after_its_phase_is_dropped() {
        let hub = hub_in_phase(TurnPhase::Events);
        let mut helper = session(&hub, "p2", "Ezren", OutcomeTier::CriticalFailure);
        helper.request_aid("bandit-raid", "diplomacy", 2).unwrap();

        let mut moderator = hub.connect();
        moderator
            .update("advance", |l| {
                for i in 0..TurnPhase::Events.step_count() {
                    turn::complete_step(l, TurnPhase::Events, i);
                }
                turn::advance_phase(l)
            })
            .unwrap();

        let events = helper.poll();
        assert!(matches!(
            &events[..],
            [SessionEvent::Dropped { check_id, .. }] if check_id == "bandit-raid"
        ));
        let ledger = helper.ledger();
        assert!(ledger.turn_state().aids.is_empty());
        assert!(ledger.turn_state().action_log.is_empty());
    }

    #[test]
    fn unknown_structure_is_a_validation_failure() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        let err = s
            .start_check(
                "build-structure",
                "crafting",
                meta(&[("settlement", "s1"), ("structure", "palace")]),
                false,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err, CheckError::Validation(vec!["unknown structure 'palace'".into()]));
        assert!(s.ledger().checks().is_empty());
    }

    #[test]
    fn apply_twice_is_rejected() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        s.start_check("deal-with-unrest", "diplomacy", BTreeMap::new(), false)
            .unwrap();
        s.poll();
        s.apply_result("deal-with-unrest").unwrap();
        let once = s.ledger().clone();
        assert_eq!(
            s.apply_result("deal-with-unrest"),
            Err(CheckError::NotInProgress("deal-with-unrest".into()))
        );
        assert_eq!(s.ledger(), &once);
    }

    #[test]
    fn skill_must_be_allowed() {
        let hub = hub_in_phase(TurnPhase::Actions);
        let mut s = session(&hub, "p1", "Amiri", OutcomeTier::Success);
        let err = s
            .start_check("deal-with-unrest", "arcana", BTreeMap::new(), false)
            .unwrap_err();
        assert!(matches!(err, CheckError::SkillNotAllowed { .. }));
    }
}
