//! Command parser.
//!
//! Parses incoming protocol lines into structured `Command` variants that
//! the main loop dispatches on.

use std::collections::BTreeMap;

use tracing::warn;

use crate::check::OutcomeTier;
use crate::resolve::ProficiencyRank;
use crate::turn::TurnPhase;

/// Pre-roll selections and flags passed with `start` and `ignore`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartParams {
    /// Skip the action-economy confirmation.
    pub confirm: bool,
    /// Skill to roll; `None` uses the check's first listed skill.
    pub skill: Option<String>,
    /// Instance metadata such as the chosen settlement or structure.
    pub metadata: BTreeMap<String, String>,
}

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load the content catalog from a JSON file.
    Catalog { path: String },

    /// Set a host option: `setoption name <id> [value <x>]`.
    SetOption { name: String, value: Option<String> },

    /// Connect a client for `player`.
    Join {
        player: String,
        name: Option<String>,
        level: Option<u32>,
    },

    /// Print the current turn and phase.
    Phase,

    /// Mark a step of a phase complete.
    Complete { phase: TurnPhase, step: usize },

    /// Move to the next phase.
    Advance,

    /// Record a d20 event roll.
    EventRoll { roll: u32 },

    /// Begin resolving a check.
    Start {
        player: String,
        check: String,
        params: StartParams,
    },

    /// Drain pending roll outcomes for a player.
    Poll { player: String },

    /// Commit a previewed outcome.
    Apply { player: String, check: String },

    /// Abandon a check before commit.
    Cancel { player: String, check: String },

    /// Resolve a check as ignored.
    Ignore {
        player: String,
        check: String,
        params: StartParams,
    },

    /// Roll to aid another check.
    Aid {
        player: String,
        check: String,
        skill: String,
        rank: ProficiencyRank,
    },

    /// Replace a preview with a chosen tier.
    Override {
        player: String,
        check: String,
        tier: OutcomeTier,
    },

    /// Print the player's check views as JSON.
    View { player: String },

    /// Print the shared ledger as JSON.
    Ledger,

    /// Roll the turn over.
    EndTurn,

    /// Synchronization ping; must reply `readyok`.
    IsReady,

    /// Terminate the process.
    Quit,
}

/// Parses a single line of input into a `Command`.
///
/// Returns `None` for empty lines or unrecognized commands. Malformed
/// arguments for known commands also return `None` after logging a warning.
pub fn parse_command(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    match tokens[0] {
        "phase" => Some(Command::Phase),
        "advance" => Some(Command::Advance),
        "ledger" => Some(Command::Ledger),
        "endturn" => Some(Command::EndTurn),
        "isready" => Some(Command::IsReady),
        "quit" => Some(Command::Quit),

        "catalog" => parse_catalog(&tokens),
        "setoption" => parse_setoption(&tokens),
        "join" => parse_join(&tokens),
        "complete" => parse_complete(&tokens),
        "eventroll" => parse_eventroll(&tokens),
        "start" => parse_player_check(&tokens, "start").map(|(player, check)| Command::Start {
            player,
            check,
            params: parse_start_params(&tokens[3..]),
        }),
        "ignore" => parse_player_check(&tokens, "ignore").map(|(player, check)| Command::Ignore {
            player,
            check,
            params: parse_start_params(&tokens[3..]),
        }),
        "apply" => parse_player_check(&tokens, "apply")
            .map(|(player, check)| Command::Apply { player, check }),
        "cancel" => parse_player_check(&tokens, "cancel")
            .map(|(player, check)| Command::Cancel { player, check }),
        "poll" => parse_player(&tokens, "poll").map(|player| Command::Poll { player }),
        "view" => parse_player(&tokens, "view").map(|player| Command::View { player }),
        "aid" => parse_aid(&tokens),
        "override" => parse_override(&tokens),

        other => {
            warn!(command = other, "unknown command");
            None
        }
    }
}

/// Parses `catalog <path>`. The path may contain spaces.
fn parse_catalog(tokens: &[&str]) -> Option<Command> {
    if tokens.len() < 2 {
        warn!("malformed catalog: expected 'catalog <path>'");
        return None;
    }
    Some(Command::Catalog {
        path: tokens[1..].join(" "),
    })
}

/// Parses `setoption name <id> [value <x>]`.
fn parse_setoption(tokens: &[&str]) -> Option<Command> {
    if tokens.len() < 3 || tokens[1] != "name" {
        warn!("malformed setoption: expected 'setoption name <id> [value <x>]'");
        return None;
    }

    let value_idx = tokens.iter().position(|&t| t == "value");
    let (name, value) = match value_idx {
        Some(vi) => {
            let name_parts = &tokens[2..vi];
            let value_parts = &tokens[vi + 1..];
            if name_parts.is_empty() {
                warn!("malformed setoption: empty name");
                return None;
            }
            let value = if value_parts.is_empty() {
                None
            } else {
                Some(value_parts.join(" "))
            };
            (name_parts.join(" "), value)
        }
        None => (tokens[2..].join(" "), None),
    };

    Some(Command::SetOption { name, value })
}

/// Parses `join <player> [name] [level]`.
fn parse_join(tokens: &[&str]) -> Option<Command> {
    if tokens.len() < 2 {
        warn!("malformed join: expected 'join <player> [name] [level]'");
        return None;
    }
    let level = match tokens.get(3) {
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(value = *raw, "invalid level");
                return None;
            }
        },
        None => None,
    };
    Some(Command::Join {
        player: tokens[1].to_string(),
        name: tokens.get(2).map(|n| n.to_string()),
        level,
    })
}

/// Parses `complete <phase> <step>`.
fn parse_complete(tokens: &[&str]) -> Option<Command> {
    if tokens.len() < 3 {
        warn!("malformed complete: expected 'complete <phase> <step>'");
        return None;
    }
    let Some(phase) = TurnPhase::from_name(tokens[1]) else {
        warn!(value = tokens[1], "unknown phase");
        return None;
    };
    match tokens[2].parse::<usize>() {
        Ok(step) => Some(Command::Complete { phase, step }),
        Err(_) => {
            warn!(value = tokens[2], "invalid step index");
            None
        }
    }
}

/// Parses `eventroll <n>`.
fn parse_eventroll(tokens: &[&str]) -> Option<Command> {
    match tokens.get(1).map(|t| t.parse::<u32>()) {
        Some(Ok(roll)) => Some(Command::EventRoll { roll }),
        _ => {
            warn!("malformed eventroll: expected 'eventroll <n>'");
            None
        }
    }
}

fn parse_player(tokens: &[&str], command: &str) -> Option<String> {
    if tokens.len() < 2 {
        warn!(command, "malformed command: expected a player id");
        return None;
    }
    Some(tokens[1].to_string())
}

fn parse_player_check(tokens: &[&str], command: &str) -> Option<(String, String)> {
    if tokens.len() < 3 {
        warn!(command, "malformed command: expected '<player> <check>'");
        return None;
    }
    Some((tokens[1].to_string(), tokens[2].to_string()))
}

/// Parses the `[confirm] [key=value ...]` tail of `start` and `ignore`.
/// `skill=<x>` selects the skill; every other pair becomes metadata.
fn parse_start_params(tokens: &[&str]) -> StartParams {
    let mut params = StartParams::default();
    for &token in tokens {
        if token == "confirm" {
            params.confirm = true;
            continue;
        }
        match token.split_once('=') {
            Some(("skill", v)) if !v.is_empty() => params.skill = Some(v.to_string()),
            Some((k, v)) if !k.is_empty() => {
                params.metadata.insert(k.to_string(), v.to_string());
            }
            _ => warn!(token, "ignoring start parameter"),
        }
    }
    params
}

/// Parses `aid <player> <check> <skill> <rank>`.
fn parse_aid(tokens: &[&str]) -> Option<Command> {
    if tokens.len() < 5 {
        warn!("malformed aid: expected 'aid <player> <check> <skill> <rank>'");
        return None;
    }
    match tokens[4].parse::<ProficiencyRank>() {
        Ok(rank) if rank <= 4 => Some(Command::Aid {
            player: tokens[1].to_string(),
            check: tokens[2].to_string(),
            skill: tokens[3].to_string(),
            rank,
        }),
        _ => {
            warn!(value = tokens[4], "invalid proficiency rank");
            None
        }
    }
}

/// Parses `override <player> <check> <tier>`.
fn parse_override(tokens: &[&str]) -> Option<Command> {
    if tokens.len() < 4 {
        warn!("malformed override: expected 'override <player> <check> <tier>'");
        return None;
    }
    match OutcomeTier::from_name(tokens[3]) {
        Some(tier) => Some(Command::Override {
            player: tokens[1].to_string(),
            check: tokens[2].to_string(),
            tier,
        }),
        None => {
            warn!(value = tokens[3], "unknown tier");
            None
        }
    }
}
