//! Simulated play.
//!
//! Runs whole games in which every player is driven by a random policy
//! through real `Session`s on a shared hub: phases are completed in order,
//! events are rolled, actions are started, aided, cancelled or applied, and
//! the turn is rolled over. After each turn the ledger is checked against
//! the rollover invariants and any violation is recorded. Output is JSONL.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::check::{builtin_catalog, Catalog, CatalogError, CheckDefinition, CheckKind};
use crate::kingdom::{KingdomLedger, Resource, Settlement, ALL_RESOURCES};
use crate::roll::DiceRoller;
use crate::session::{Player, Session, SessionEvent, StartOutcome, META_SETTLEMENT, META_STRUCTURE};
use crate::transport::{LedgerHub, LedgerTransport, Replica};
use crate::turn::{self, TurnPhase, ALL_PHASES};

const CHARACTER_NAMES: [&str; 6] = ["Amiri", "Ezren", "Kyra", "Merisiel", "Seelah", "Valeros"];

/// Unrest at which the kingdom rolls for an incident.
const INCIDENT_UNREST: i32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AutoplayError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("failed to build thread pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("autoplay worker thread panicked")]
    WorkerPanicked,
}

/// Configuration for simulated games.
#[derive(Debug, Clone)]
pub struct AutoplayConfig {
    /// Number of games to play.
    pub num_games: usize,
    /// Turns per game.
    pub turns: u32,
    /// Players per game, at most six.
    pub players: usize,
    /// Character level of every player.
    pub level: u32,
    /// Skill modifier of every player.
    pub skill_modifier: i32,
    /// Flat gold collected in the resources phase.
    pub income: i32,
    /// Chance that another player aids a triggered event.
    pub aid_chance: f64,
    /// Chance that a player cancels after seeing the preview.
    pub cancel_chance: f64,
    /// Chance that a player takes a second, confirmed action.
    pub extra_action_chance: f64,
    /// Number of parallel threads for concurrent games.
    pub threads: usize,
    /// Random seed (0 = use entropy).
    pub seed: u64,
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        AutoplayConfig {
            num_games: 10,
            turns: 12,
            players: 4,
            level: 3,
            skill_modifier: 7,
            income: 3,
            aid_chance: 0.3,
            cancel_chance: 0.1,
            extra_action_chance: 0.25,
            threads: 4,
            seed: 0,
        }
    }
}

/// What happened in one turn.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnRecord {
    pub turn: u32,
    pub event_roll: u32,
    pub event_triggered: bool,
    pub applied: usize,
    pub cancelled: usize,
    pub rejected: usize,
    /// Starts stopped at the action-economy confirmation.
    pub declined: usize,
    pub aids: usize,
    pub upgrades: usize,
    pub queued: usize,
    pub built: Vec<String>,
    /// Resource totals after rollover.
    pub resources: BTreeMap<String, i32>,
}

/// A complete simulated game.
#[derive(Debug, Clone, Serialize)]
pub struct GameRecord {
    pub game_id: usize,
    pub turns: Vec<TurnRecord>,
    pub settlement_levels: BTreeMap<String, u32>,
    /// Invariant violations, empty for a healthy run.
    pub violations: Vec<String>,
}

fn fresh_kingdom() -> KingdomLedger {
    let mut ledger = KingdomLedger::new("Autoplay");
    ledger.add_settlement(Settlement::new("capital", "Capital", 1));
    ledger.add_settlement(Settlement::new("outpost", "Outpost", 1));
    ledger.set_resource(Resource::Gold, 8);
    ledger.set_resource(Resource::Food, 4);
    ledger.set_resource(Resource::Unrest, 2);
    for phase in ALL_PHASES {
        turn::start_phase(&mut ledger, phase);
    }
    ledger
}

/// Random target selection for checks that need one.
fn pick_metadata(
    def: &CheckDefinition,
    catalog: &Catalog,
    ledger: &KingdomLedger,
    rng: &mut SmallRng,
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if def.requirements.settlement || def.scaling.is_some() {
        let settlements = ledger.settlements();
        if !settlements.is_empty() {
            let s = &settlements[rng.gen_range(0..settlements.len())];
            metadata.insert(META_SETTLEMENT.to_string(), s.id.clone());
        }
    }
    if def.requirements.structure {
        let structures = catalog.structures();
        if !structures.is_empty() {
            let st = &structures[rng.gen_range(0..structures.len())];
            metadata.insert(META_STRUCTURE.to_string(), st.id.clone());
        }
    }
    metadata
}

/// Starts, previews, then cancels or applies one check.
fn attempt(
    session: &mut Session<Replica>,
    catalog: &Catalog,
    def: &CheckDefinition,
    confirmed: bool,
    config: &AutoplayConfig,
    rng: &mut SmallRng,
    record: &mut TurnRecord,
) {
    let skill = &def.skills[rng.gen_range(0..def.skills.len())];
    let metadata = pick_metadata(def, catalog, session.ledger(), rng);
    match session.start_check(&def.id, skill, metadata, confirmed) {
        Ok(StartOutcome::Rolling(_)) | Ok(StartOutcome::Resumed(_)) => {}
        Ok(StartOutcome::NeedsConfirmation { .. }) => {
            record.declined += 1;
            return;
        }
        Err(e) => {
            debug!(check = %def.id, error = %e, "start rejected");
            record.rejected += 1;
            return;
        }
    }

    for event in session.poll() {
        if let SessionEvent::Dropped { .. } = event {
            record.rejected += 1;
        }
    }

    if rng.gen_bool(config.cancel_chance.clamp(0.0, 1.0)) {
        if session.cancel(&def.id).is_ok() {
            record.cancelled += 1;
        }
        return;
    }

    match session.apply_result(&def.id) {
        Ok(report) => {
            record.applied += 1;
            record.upgrades += report.upgraded.len();
            record.queued += report.queued.len();
        }
        Err(e) => {
            debug!(check = %def.id, error = %e, "apply rejected; abandoning");
            let _ = session.cancel(&def.id);
            record.rejected += 1;
        }
    }
}

fn finish_phase(session: &mut Session<Replica>, phase: TurnPhase, violations: &mut Vec<String>) {
    for step in 0..phase.step_count() {
        session.complete_step(phase, step);
    }
    if phase != TurnPhase::Upkeep {
        if let Err(e) = session.advance_phase() {
            violations.push(format!("advance from {}: {}", phase, e));
        }
    }
}

/// Checks the state left by a rollover to `turn`.
fn check_rollover(ledger: &KingdomLedger, turn: u32, violations: &mut Vec<String>) {
    let state = ledger.turn_state();
    if state.turn != turn {
        violations.push(format!("expected turn {}, found {}", turn, state.turn));
    }
    if state.phase != ALL_PHASES[0] {
        violations.push(format!("turn {} starts in {}", turn, state.phase));
    }
    if !state.action_log.is_empty() {
        violations.push(format!("turn {}: action log not cleared", turn));
    }
    if !state.aids.is_empty() {
        violations.push(format!("turn {}: aid records not cleared", turn));
    }
    if !ledger.checks().is_empty() {
        violations.push(format!("turn {}: {} check instance(s) survived", turn, ledger.checks().len()));
    }
    for resource in ALL_RESOURCES {
        let amount = ledger.resource(resource);
        if amount < 0 {
            violations.push(format!("turn {}: {} is negative ({})", turn, resource.name(), amount));
        }
        if !resource.is_storable() && amount != 0 {
            violations.push(format!("turn {}: {} carried over", turn, resource.name()));
        }
    }
}

/// Plays a single simulated game and returns its record.
pub fn play_game(
    config: &AutoplayConfig,
    catalog: &Arc<Catalog>,
    game_id: usize,
    rng: &mut SmallRng,
) -> GameRecord {
    let hub = LedgerHub::new(fresh_kingdom());
    let players = config.players.clamp(1, CHARACTER_NAMES.len());
    let mut sessions: Vec<Session<Replica>> = (0..players)
        .map(|i| {
            let mut player = Player::new(format!("p{}", i + 1), CHARACTER_NAMES[i], config.level);
            player.skill_modifier = config.skill_modifier;
            let roller = DiceRoller::new(rng.gen_range(1..u64::MAX));
            Session::new(player, hub.connect(), Arc::clone(catalog), Box::new(roller))
        })
        .collect();

    let actions: Vec<&CheckDefinition> = catalog
        .checks()
        .iter()
        .filter(|c| c.kind == CheckKind::Action)
        .collect();
    let events: Vec<&CheckDefinition> = catalog
        .checks()
        .iter()
        .filter(|c| c.kind == CheckKind::Event)
        .collect();
    let incidents: Vec<&CheckDefinition> = catalog
        .checks()
        .iter()
        .filter(|c| c.kind == CheckKind::Incident)
        .collect();

    let mut turns = Vec::with_capacity(config.turns as usize);
    let mut violations = Vec::new();

    for _ in 0..config.turns {
        let mut record = TurnRecord {
            turn: sessions[0].ledger().turn_state().turn,
            ..TurnRecord::default()
        };

        finish_phase(&mut sessions[0], TurnPhase::Status, &mut violations);

        let income = config.income;
        let _ = sessions[0].transport_mut().update("collect_income", |l| {
            l.adjust_resource(Resource::Gold, income);
            Ok::<_, ()>(())
        });
        finish_phase(&mut sessions[0], TurnPhase::Resources, &mut violations);

        if sessions[0].ledger().resource(Resource::Unrest) >= INCIDENT_UNREST && !incidents.is_empty() {
            let who = rng.gen_range(0..players);
            let def = incidents[rng.gen_range(0..incidents.len())];
            attempt(&mut sessions[who], catalog, def, true, config, rng, &mut record);
        }
        finish_phase(&mut sessions[0], TurnPhase::Unrest, &mut violations);

        record.event_roll = rng.gen_range(1..=20);
        record.event_triggered = sessions[0].record_event_roll(record.event_roll);
        if record.event_triggered && !events.is_empty() {
            let def = events[rng.gen_range(0..events.len())];
            let who = rng.gen_range(0..players);
            if players > 1 && rng.gen_bool(config.aid_chance.clamp(0.0, 1.0)) {
                let helper = (who + 1 + rng.gen_range(0..players - 1)) % players;
                let skill = &def.skills[rng.gen_range(0..def.skills.len())];
                if sessions[helper].request_aid(&def.id, skill, rng.gen_range(0..=4)).is_ok() {
                    for event in sessions[helper].poll() {
                        if let SessionEvent::AidStored { .. } = event {
                            record.aids += 1;
                        }
                    }
                }
            }
            if rng.gen_bool(0.1) {
                if sessions[who].ignore(&def.id, BTreeMap::new()).is_ok()
                    && sessions[who].apply_result(&def.id).is_ok()
                {
                    record.applied += 1;
                }
            } else {
                attempt(&mut sessions[who], catalog, def, true, config, rng, &mut record);
            }
        }
        finish_phase(&mut sessions[0], TurnPhase::Events, &mut violations);

        for who in 0..players {
            if actions.is_empty() {
                break;
            }
            let def = actions[rng.gen_range(0..actions.len())];
            attempt(&mut sessions[who], catalog, def, false, config, rng, &mut record);
            if rng.gen_bool(config.extra_action_chance.clamp(0.0, 1.0)) {
                let def = actions[rng.gen_range(0..actions.len())];
                attempt(&mut sessions[who], catalog, def, false, config, rng, &mut record);
                let def = actions[rng.gen_range(0..actions.len())];
                attempt(&mut sessions[who], catalog, def, true, config, rng, &mut record);
            }
        }
        finish_phase(&mut sessions[0], TurnPhase::Actions, &mut violations);

        sessions[0].complete_step(TurnPhase::Upkeep, 0);
        record.built = sessions[0].process_build_queue();
        let next = sessions[0].end_turn();

        let ledger = sessions[0].ledger();
        check_rollover(ledger, next, &mut violations);
        record.resources = ALL_RESOURCES
            .iter()
            .map(|&r| (r.name().to_string(), ledger.resource(r)))
            .collect();
        turns.push(record);
    }

    let settlement_levels = sessions[0]
        .ledger()
        .settlements()
        .iter()
        .map(|s| (s.id.clone(), s.level))
        .collect();

    GameRecord {
        game_id,
        turns,
        settlement_levels,
        violations,
    }
}

/// Runs every configured game and collects the records.
pub fn run_autoplay(config: &AutoplayConfig) -> Result<Vec<GameRecord>, AutoplayError> {
    let mut games = Vec::with_capacity(config.num_games);
    run_autoplay_with_callback(config, |game| games.push(game))?;
    games.sort_by_key(|g| g.game_id);
    Ok(games)
}

/// Runs the games, calling `on_game` with each completed record.
pub fn run_autoplay_with_callback<F>(config: &AutoplayConfig, on_game: F) -> Result<(), AutoplayError>
where
    F: FnMut(GameRecord) + Send,
{
    let catalog = Arc::new(builtin_catalog()?);
    if config.threads > 1 {
        run_parallel(config, catalog, on_game)
    } else {
        run_sequential(config, &catalog, on_game);
        Ok(())
    }
}

fn game_rng(seed: u64, game_id: usize) -> SmallRng {
    if seed != 0 {
        SmallRng::seed_from_u64(seed.wrapping_add(game_id as u64))
    } else {
        SmallRng::from_entropy()
    }
}

fn run_sequential<F>(config: &AutoplayConfig, catalog: &Arc<Catalog>, mut on_game: F)
where
    F: FnMut(GameRecord),
{
    for i in 0..config.num_games {
        let start = Instant::now();
        let mut rng = game_rng(config.seed, i);
        let game = play_game(config, catalog, i, &mut rng);
        info!(
            game = i + 1,
            of = config.num_games,
            violations = game.violations.len(),
            secs = start.elapsed().as_secs_f64(),
            "game finished"
        );
        on_game(game);
    }
}

/// Plays games concurrently on a rayon pool and delivers them to `on_game`
/// on the calling thread.
fn run_parallel<F>(config: &AutoplayConfig, catalog: Arc<Catalog>, mut on_game: F) -> Result<(), AutoplayError>
where
    F: FnMut(GameRecord) + Send,
{
    use rayon::prelude::*;
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel::<GameRecord>();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()?;

    let config = config.clone();
    let handle = std::thread::spawn(move || {
        let completed = AtomicUsize::new(0);
        pool.install(|| {
            (0..config.num_games)
                .into_par_iter()
                .for_each_with(tx, |tx, i| {
                    let start = Instant::now();
                    let mut rng = game_rng(config.seed, i);
                    let game = play_game(&config, &catalog, i, &mut rng);
                    let n = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        game = n,
                        of = config.num_games,
                        violations = game.violations.len(),
                        secs = start.elapsed().as_secs_f64(),
                        "game finished"
                    );
                    let _ = tx.send(game);
                });
        });
    });

    for game in rx {
        on_game(game);
    }

    handle.join().map_err(|_| AutoplayError::WorkerPanicked)
}

/// Writes game records as JSONL (one JSON object per game, one per line).
pub fn write_jsonl<W: Write>(games: &[GameRecord], out: &mut W) -> std::io::Result<()> {
    for game in games {
        serde_json::to_writer(&mut *out, game)?;
        writeln!(out)?;
    }
    out.flush()
}

/// Aggregate counts over a batch of games.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub games: usize,
    pub turns: usize,
    pub applied: usize,
    pub cancelled: usize,
    pub rejected: usize,
    pub declined: usize,
    pub aids: usize,
    pub built: usize,
    pub violations: usize,
}

pub fn summarize(games: &[GameRecord]) -> Summary {
    let mut s = Summary {
        games: games.len(),
        ..Summary::default()
    };
    for game in games {
        s.violations += game.violations.len();
        for t in &game.turns {
            s.turns += 1;
            s.applied += t.applied;
            s.cancelled += t.cancelled;
            s.rejected += t.rejected;
            s.declined += t.declined;
            s.aids += t.aids;
            s.built += t.built.len();
        }
    }
    s
}
