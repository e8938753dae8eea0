//! Host state for the line protocol.
//!
//! Owns the shared ledger hub, the content catalog, one client session per
//! joined player, and the host options. Each `handle_*` method writes its
//! response lines to `out`.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::check::{builtin_catalog, load_catalog, Catalog, CatalogError, OutcomeTier};
use crate::error::CheckError;
use crate::kingdom::{KingdomLedger, Resource, Settlement};
use crate::protocol::{Command, StartParams};
use crate::resolve::ProficiencyRank;
use crate::roll::{DiceRoller, FixedRoller, RollService};
use crate::session::{Player, Session, SessionEvent, StartOutcome};
use crate::transport::{LedgerHub, LedgerTransport, Replica};
use crate::turn::{self, TurnPhase, ACTIONS_PER_TURN};

/// Character level used when `join` gives none and no option is set.
const DEFAULT_LEVEL: u32 = 1;

/// Starting treasury of a fresh kingdom.
const STARTING_GOLD: i32 = 10;
const STARTING_FOOD: i32 = 4;

/// Holds the mutable state of the host between commands.
pub struct Engine {
    hub: LedgerHub,
    moderator: Replica,
    catalog: Arc<Catalog>,
    sessions: BTreeMap<String, Session<Replica>>,
    pub options: HashMap<String, String>,
}

impl Engine {
    /// Creates a host around `ledger` with the given catalog.
    pub fn new(ledger: KingdomLedger, catalog: Catalog) -> Self {
        let hub = LedgerHub::new(ledger);
        let moderator = hub.connect();
        Engine {
            hub,
            moderator,
            catalog: Arc::new(catalog),
            sessions: BTreeMap::new(),
            options: HashMap::new(),
        }
    }

    /// A fresh kingdom with one settlement, the builtin catalog, and every
    /// phase of turn 1 seeded.
    pub fn with_builtin() -> Result<Self, CatalogError> {
        let mut ledger = KingdomLedger::new("Stolen Lands");
        ledger.add_settlement(Settlement::new("capital", "Capital", 1));
        ledger.set_resource(Resource::Gold, STARTING_GOLD);
        ledger.set_resource(Resource::Food, STARTING_FOOD);
        for phase in turn::ALL_PHASES {
            turn::start_phase(&mut ledger, phase);
        }
        Ok(Engine::new(ledger, builtin_catalog()?))
    }

    pub fn hub(&self) -> &LedgerHub {
        &self.hub
    }

    /// Sets a host option. Roll options take effect for joined players too.
    pub fn set_option(&mut self, name: String, value: Option<String>) {
        let affects_rolls = name == "Seed" || name == "ForcedTier";
        self.options.insert(name, value.unwrap_or_default());
        if affects_rolls {
            let rollers: Vec<Box<dyn RollService>> =
                (0..self.sessions.len()).map(|i| self.roller(i)).collect();
            for (session, roller) in self.sessions.values_mut().zip(rollers) {
                session.set_roller(roller);
            }
        }
    }

    fn player_name(&self) -> Option<String> {
        self.options.get("PlayerName").filter(|v| !v.is_empty()).cloned()
    }

    fn character_level(&self) -> u32 {
        self.options
            .get("CharacterLevel")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_LEVEL)
    }

    fn skill_modifier(&self) -> i32 {
        self.options
            .get("SkillModifier")
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(0)
    }

    fn seed(&self) -> u64 {
        self.options
            .get("Seed")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    }

    fn forced_tier(&self) -> Option<OutcomeTier> {
        self.options
            .get("ForcedTier")
            .and_then(|v| OutcomeTier::from_name(v))
    }

    fn actions_per_turn(&self) -> usize {
        self.options
            .get("ActionsPerTurn")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(ACTIONS_PER_TURN)
    }

    /// Roll service for the `index`-th joined player.
    fn roller(&self, index: usize) -> Box<dyn RollService> {
        match self.forced_tier() {
            Some(tier) => Box::new(FixedRoller { tier }),
            None => {
                let seed = self.seed();
                let seed = if seed == 0 { 0 } else { seed.wrapping_add(index as u64) };
                Box::new(DiceRoller::new(seed))
            }
        }
    }

    /// Dispatches one parsed command. Returns false on `quit`.
    pub fn handle<W: Write>(&mut self, cmd: Command, out: &mut W) -> io::Result<bool> {
        match cmd {
            Command::Catalog { path } => self.handle_catalog(&path, out)?,
            Command::SetOption { name, value } => self.set_option(name, value),
            Command::Join {
                player,
                name,
                level,
            } => self.handle_join(player, name, level, out)?,
            Command::Phase => self.handle_phase(out)?,
            Command::Complete { phase, step } => self.handle_complete(phase, step, out)?,
            Command::Advance => self.handle_advance(out)?,
            Command::EventRoll { roll } => self.handle_eventroll(roll, out)?,
            Command::Start {
                player,
                check,
                params,
            } => self.handle_start(&player, &check, params, out)?,
            Command::Poll { player } => self.handle_poll(&player, out)?,
            Command::Apply { player, check } => self.handle_apply(&player, &check, out)?,
            Command::Cancel { player, check } => self.handle_cancel(&player, &check, out)?,
            Command::Ignore {
                player,
                check,
                params,
            } => self.handle_ignore(&player, &check, params, out)?,
            Command::Aid {
                player,
                check,
                skill,
                rank,
            } => self.handle_aid(&player, &check, &skill, rank, out)?,
            Command::Override {
                player,
                check,
                tier,
            } => self.handle_override(&player, &check, tier, out)?,
            Command::View { player } => self.handle_view(&player, out)?,
            Command::Ledger => self.handle_ledger(out)?,
            Command::EndTurn => self.handle_endturn(out)?,
            Command::IsReady => self.handle_isready(out)?,
            Command::Quit => return Ok(false),
        }
        out.flush()?;
        Ok(true)
    }

    /// Handles the `isready` command.
    pub fn handle_isready<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "readyok")
    }

    fn handle_catalog<W: Write>(&mut self, path: &str, out: &mut W) -> io::Result<()> {
        if !self.sessions.is_empty() {
            return writeln!(out, "error lifecycle catalog must be loaded before players join");
        }
        match load_catalog(Path::new(path)) {
            Ok(catalog) => {
                let count = catalog.checks().len();
                self.catalog = Arc::new(catalog);
                info!(path, checks = count, "catalog loaded");
                writeln!(out, "ok catalog {}", count)
            }
            Err(e) => writeln!(out, "error validation {}", e),
        }
    }

    fn handle_join<W: Write>(
        &mut self,
        player: String,
        name: Option<String>,
        level: Option<u32>,
        out: &mut W,
    ) -> io::Result<()> {
        if self.sessions.contains_key(&player) {
            return writeln!(out, "error conflict player '{}' already joined", player);
        }
        let name = name
            .or_else(|| self.player_name())
            .unwrap_or_else(|| player.clone());
        let mut character = Player::new(player.clone(), name, level.unwrap_or_else(|| self.character_level()));
        character.skill_modifier = self.skill_modifier();
        let roller = self.roller(self.sessions.len());
        let session = Session::new(character, self.hub.connect(), Arc::clone(&self.catalog), roller)
            .with_allowance(self.actions_per_turn());
        info!(player = %player, "player joined");
        writeln!(out, "ok joined {}", player)?;
        self.sessions.insert(player, session);
        Ok(())
    }

    fn handle_phase<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let state = self.moderator.read().turn_state();
        let (done, total) = match state.steps(state.phase) {
            Some(steps) => (steps.iter().filter(|&&d| d).count(), steps.len()),
            None => (0, state.phase.step_count()),
        };
        writeln!(out, "phase {} {} {}/{}", state.turn, state.phase, done, total)
    }

    fn handle_complete<W: Write>(
        &mut self,
        phase: TurnPhase,
        step: usize,
        out: &mut W,
    ) -> io::Result<()> {
        if step >= phase.step_count() {
            return writeln!(
                out,
                "error validation {} phase has {} step(s)",
                phase,
                phase.step_count()
            );
        }
        let _ = self.moderator.update("complete_step", |l| {
            turn::start_phase(l, phase);
            turn::complete_step(l, phase, step);
            Ok::<_, ()>(())
        });
        writeln!(out, "ok complete {} {}", phase, step)
    }

    fn handle_advance<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        match self.moderator.update("advance_phase", turn::advance_phase) {
            Ok(phase) => writeln!(out, "ok phase {}", phase),
            Err(e) => writeln!(out, "error validation {}", e),
        }
    }

    fn handle_eventroll<W: Write>(&mut self, roll: u32, out: &mut W) -> io::Result<()> {
        let triggered = self
            .moderator
            .update("record_event_roll", |l| Ok::<_, ()>(turn::record_event_roll(l, roll)))
            .unwrap_or(false);
        let dc = self.moderator.read().turn_state().event_dc;
        let verdict = if triggered { "triggered" } else { "none" };
        writeln!(out, "ok event {} dc {}", verdict, dc)
    }

    fn handle_endturn<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let completed = self
            .moderator
            .update("process_build_queue", |l| {
                let done = if l.turn_state().phase == TurnPhase::Upkeep {
                    turn::process_build_queue(l)
                } else {
                    Vec::new()
                };
                Ok::<_, ()>(done)
            })
            .unwrap_or_default();
        for project in &completed {
            writeln!(out, "ok built {}", project)?;
        }
        let turn = self
            .moderator
            .update("end_turn", |l| Ok::<_, ()>(turn::end_turn(l)))
            .unwrap_or(0);
        writeln!(out, "ok turn {}", turn)
    }

    fn handle_ledger<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let snapshot = self.hub.snapshot();
        match serde_json::to_string(&*snapshot.ledger) {
            Ok(json) => writeln!(out, "ledger {}", json),
            Err(e) => writeln!(out, "error validation {}", e),
        }
    }

    fn session<W: Write>(
        &mut self,
        player: &str,
        out: &mut W,
    ) -> io::Result<Option<&mut Session<Replica>>> {
        match self.sessions.get_mut(player) {
            Some(s) => Ok(Some(s)),
            None => {
                writeln!(out, "error missing unknown player '{}'", player)?;
                Ok(None)
            }
        }
    }

    fn handle_start<W: Write>(
        &mut self,
        player: &str,
        check: &str,
        params: StartParams,
        out: &mut W,
    ) -> io::Result<()> {
        let Some(session) = self.session(player, out)? else {
            return Ok(());
        };
        let skill = match params.skill {
            Some(s) => s,
            None => match session.catalog().check(check).and_then(|d| d.skills.first()) {
                Some(s) => s.clone(),
                None => return write_error(out, &CheckError::MissingDefinition(check.to_string())),
            },
        };
        match session.start_check(check, &skill, params.metadata, params.confirm) {
            Ok(StartOutcome::Rolling(id)) => writeln!(out, "ok rolling {} {}", check, id),
            Ok(StartOutcome::Resumed(id)) => writeln!(out, "ok resumed {} {}", check, id),
            Ok(StartOutcome::NeedsConfirmation { taken, allowance }) => {
                writeln!(out, "confirm {} {} {}", check, taken, allowance)
            }
            Err(e) => write_error(out, &e),
        }
    }

    fn handle_poll<W: Write>(&mut self, player: &str, out: &mut W) -> io::Result<()> {
        let Some(session) = self.session(player, out)? else {
            return Ok(());
        };
        let events = session.poll();
        for event in &events {
            match event {
                SessionEvent::Preview {
                    check_id, outcome, ..
                } => write_preview(out, check_id, outcome)?,
                SessionEvent::AidStored {
                    target_check_id,
                    tier,
                    bonus,
                    keep_higher,
                } => writeln!(
                    out,
                    "ok aid {} {} {:+}{}",
                    target_check_id,
                    tier.name(),
                    bonus,
                    if *keep_higher { " keephigher" } else { "" }
                )?,
                SessionEvent::AidFailed { target_check_id } => {
                    writeln!(out, "ok aidfailed {}", target_check_id)?
                }
                SessionEvent::Dropped { check_id, reason } => {
                    writeln!(out, "error lifecycle {} dropped: {}", check_id, reason)?
                }
            }
        }
        writeln!(out, "ok polled {}", events.len())
    }

    fn handle_apply<W: Write>(&mut self, player: &str, check: &str, out: &mut W) -> io::Result<()> {
        let Some(session) = self.session(player, out)? else {
            return Ok(());
        };
        match session.apply_result(check) {
            Ok(report) => match serde_json::to_string(&report) {
                Ok(json) => writeln!(out, "ok applied {} {}", check, json),
                Err(e) => writeln!(out, "error validation {}", e),
            },
            Err(e) => write_error(out, &e),
        }
    }

    fn handle_cancel<W: Write>(&mut self, player: &str, check: &str, out: &mut W) -> io::Result<()> {
        let Some(session) = self.session(player, out)? else {
            return Ok(());
        };
        match session.cancel(check) {
            Ok(()) => writeln!(out, "ok cancelled {}", check),
            Err(e) => write_error(out, &e),
        }
    }

    fn handle_ignore<W: Write>(
        &mut self,
        player: &str,
        check: &str,
        params: StartParams,
        out: &mut W,
    ) -> io::Result<()> {
        let Some(session) = self.session(player, out)? else {
            return Ok(());
        };
        match session.ignore(check, params.metadata) {
            Ok(outcome) => write_preview(out, check, &outcome),
            Err(e) => write_error(out, &e),
        }
    }

    fn handle_aid<W: Write>(
        &mut self,
        player: &str,
        check: &str,
        skill: &str,
        rank: ProficiencyRank,
        out: &mut W,
    ) -> io::Result<()> {
        let Some(session) = self.session(player, out)? else {
            return Ok(());
        };
        match session.request_aid(check, skill, rank) {
            Ok(()) => writeln!(out, "ok aiding {}", check),
            Err(e) => write_error(out, &e),
        }
    }

    fn handle_override<W: Write>(
        &mut self,
        player: &str,
        check: &str,
        tier: OutcomeTier,
        out: &mut W,
    ) -> io::Result<()> {
        let Some(session) = self.session(player, out)? else {
            return Ok(());
        };
        match session.debug_override(check, tier) {
            Ok(outcome) => write_preview(out, check, &outcome),
            Err(e) => write_error(out, &e),
        }
    }

    fn handle_view<W: Write>(&mut self, player: &str, out: &mut W) -> io::Result<()> {
        let Some(session) = self.session(player, out)? else {
            return Ok(());
        };
        match serde_json::to_string(&session.views()) {
            Ok(json) => writeln!(out, "view {}", json),
            Err(e) => writeln!(out, "error validation {}", e),
        }
    }
}

fn write_preview<W: Write, T: serde::Serialize>(
    out: &mut W,
    check: &str,
    outcome: &T,
) -> io::Result<()> {
    match serde_json::to_string(outcome) {
        Ok(json) => writeln!(out, "preview {} {}", check, json),
        Err(e) => writeln!(out, "error validation {}", e),
    }
}

fn write_error<W: Write>(out: &mut W, err: &CheckError) -> io::Result<()> {
    warn!(kind = err.kind().name(), error = %err, "command rejected");
    writeln!(out, "error {} {}", err.kind().name(), err)
}
