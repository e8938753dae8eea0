//! Integration tests for the regency binary.
//!
//! Spawns the binary, sends commands via stdin, and checks stdout responses.

use std::io::{BufRead, Write};
use std::process::{Command, Stdio};

/// Sends a sequence of commands to the binary and collects stdout lines.
fn run_engine(commands: &[&str]) -> Vec<String> {
    let exe = env!("CARGO_BIN_EXE_regency");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start regency");

    let mut stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();
    let reader = std::io::BufReader::new(stdout);

    for cmd in commands {
        writeln!(stdin, "{}", cmd).unwrap();
    }
    stdin.flush().unwrap();
    drop(stdin);

    let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
    let status = child.wait().expect("failed to wait on child");
    assert!(status.success());
    lines
}

/// Commands that walk a fresh kingdom to the actions phase.
const TO_ACTIONS: [&str; 9] = [
    "complete status 0",
    "advance",
    "complete resources 0",
    "advance",
    "complete unrest 0",
    "advance",
    "complete events 0",
    "complete events 1",
    "advance",
];

fn script(prefix: &[&str], rest: &[&str]) -> Vec<String> {
    let mut lines: Vec<&str> = prefix.to_vec();
    lines.extend_from_slice(rest);
    run_engine(&lines)
}

#[test]
fn isready_response() {
    let lines = run_engine(&["isready", "quit"]);
    assert_eq!(lines, vec!["readyok".to_string()]);
}

#[test]
fn unknown_commands_are_ignored() {
    let lines = run_engine(&["foobar", "start", "isready", "quit"]);
    assert_eq!(lines, vec!["readyok".to_string()]);
}

#[test]
fn eof_without_quit_exits_cleanly() {
    let lines = run_engine(&["phase"]);
    assert_eq!(lines, vec!["phase 1 status 0/1".to_string()]);
}

#[test]
fn phases_advance_in_order() {
    let lines = script(&TO_ACTIONS, &["phase", "quit"]);
    let advanced: Vec<&String> = lines.iter().filter(|l| l.starts_with("ok phase ")).collect();
    assert_eq!(
        advanced,
        vec!["ok phase resources", "ok phase unrest", "ok phase events", "ok phase actions"]
    );
    assert_eq!(lines.last().unwrap(), "phase 1 actions 0/1");
}

#[test]
fn action_preview_apply_and_confirmation() {
    let lines = script(
        &TO_ACTIONS,
        &[
            "setoption name ForcedTier value criticalSuccess",
            "join p1 Amiri",
            "start p1 claim-hexes",
            "poll p1",
            "apply p1 claim-hexes",
            "apply p1 claim-hexes",
            "start p1 deal-with-unrest",
            "start p1 deal-with-unrest confirm",
            "quit",
        ],
    );
    let tail = &lines[TO_ACTIONS.len()..];
    assert_eq!(tail[0], "ok joined p1");
    assert!(tail[1].starts_with("ok rolling claim-hexes "), "{}", tail[1]);
    assert!(tail[2].starts_with("preview claim-hexes "), "{}", tail[2]);
    assert!(tail[2].contains("\"tier\":\"criticalSuccess\""));
    assert_eq!(tail[3], "ok polled 1");
    assert!(tail[4].starts_with("ok applied claim-hexes "), "{}", tail[4]);
    assert_eq!(tail[5], "error missing no 'claim-hexes' check is in progress");
    assert_eq!(tail[6], "confirm deal-with-unrest 1 4");
    assert!(tail[7].starts_with("ok rolling deal-with-unrest "), "{}", tail[7]);
}

#[test]
fn cancel_leaves_ledger_unchanged() {
    let lines = script(
        &TO_ACTIONS,
        &[
            "join p1 Amiri",
            "ledger",
            "start p1 harvest-resources",
            "cancel p1 harvest-resources",
            "poll p1",
            "ledger",
            "quit",
        ],
    );
    let ledgers: Vec<&String> = lines.iter().filter(|l| l.starts_with("ledger ")).collect();
    assert_eq!(ledgers.len(), 2);
    assert_eq!(ledgers[0], ledgers[1]);
    assert!(lines.contains(&"ok cancelled harvest-resources".to_string()));
    assert!(lines.contains(&"ok polled 0".to_string()));
}

#[test]
fn second_player_sees_lock() {
    let lines = script(
        &TO_ACTIONS,
        &[
            "join p1 Amiri",
            "join p2 Ezren",
            "start p1 harvest-resources",
            "start p2 harvest-resources",
            "view p2",
            "quit",
        ],
    );
    assert!(lines
        .iter()
        .any(|l| l == "error conflict 'harvest-resources' is being resolved by Amiri"));
    let view = lines.iter().find(|l| l.starts_with("view ")).unwrap();
    assert!(view.contains("\"locked_by\":\"Amiri\""), "{}", view);
}

#[test]
fn wrong_phase_is_a_validation_error() {
    let lines = run_engine(&["join p1 Amiri", "start p1 claim-hexes", "quit"]);
    assert_eq!(
        lines[1],
        "error validation 'claim-hexes' can only be resolved during the actions phase"
    );
}

#[test]
fn endturn_resets_turn() {
    let lines = script(&TO_ACTIONS, &["endturn", "phase", "quit"]);
    assert!(lines.contains(&"ok turn 2".to_string()));
    assert_eq!(lines.last().unwrap(), "phase 2 status 0/1");
}
