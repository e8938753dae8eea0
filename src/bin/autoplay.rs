//! Simulated play CLI.
//!
//! Plays whole games with randomly acting players and writes one JSON
//! summary per game as JSONL.
//!
//! Usage:
//!   cargo run --release --bin autoplay -- [OPTIONS]
//!
//! Options:
//!   --games N        Number of games to play (default: 10)
//!   --turns N        Turns per game (default: 12)
//!   --players N      Players per game, 1-6 (default: 4)
//!   --level N        Character level (default: 3)
//!   --income N       Gold collected each turn (default: 3)
//!   --threads N      Number of parallel threads (default: 4)
//!   --seed N         Random seed, 0 for entropy (default: 0)
//!   --output FILE    Output file path (default: stdout)
//!   --quiet          Suppress summary output

use std::env;
use std::fs::File;
use std::io::{self, BufWriter};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use regency::autoplay::{self, AutoplayConfig};

fn parse_flag<T: FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    args.get(i)
        .ok_or_else(|| format!("missing value for {}", flag))?
        .parse()
        .map_err(|_| format!("invalid {} value: '{}'", flag, args[i]))
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let mut config = AutoplayConfig::default();
    let mut output_path: Option<String> = None;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].clone();
        let parsed = match flag.as_str() {
            "--games" => {
                i += 1;
                parse_flag(&args, i, &flag).map(|v| config.num_games = v)
            }
            "--turns" => {
                i += 1;
                parse_flag(&args, i, &flag).map(|v| config.turns = v)
            }
            "--players" => {
                i += 1;
                parse_flag(&args, i, &flag).map(|v| config.players = v)
            }
            "--level" => {
                i += 1;
                parse_flag(&args, i, &flag).map(|v| config.level = v)
            }
            "--income" => {
                i += 1;
                parse_flag(&args, i, &flag).map(|v| config.income = v)
            }
            "--threads" => {
                i += 1;
                parse_flag(&args, i, &flag).map(|v| config.threads = v)
            }
            "--seed" => {
                i += 1;
                parse_flag(&args, i, &flag).map(|v| config.seed = v)
            }
            "--output" => {
                i += 1;
                parse_flag(&args, i, &flag).map(|v| output_path = Some(v))
            }
            "--quiet" => {
                quiet = true;
                Ok(())
            }
            "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            other => Err(format!("unknown argument: {}", other)),
        };
        if let Err(msg) = parsed {
            eprintln!("{}", msg);
            print_usage();
            return ExitCode::FAILURE;
        }
        i += 1;
    }

    let default_level = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    if !quiet {
        eprintln!(
            "Autoplay: {} games, {} turns, {} players, level {}, {} threads",
            config.num_games, config.turns, config.players, config.level, config.threads
        );
    }

    let start = Instant::now();
    let games = match autoplay::run_autoplay(&config) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("autoplay failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let elapsed = start.elapsed();

    if !quiet {
        let s = autoplay::summarize(&games);
        eprintln!(
            "Completed {} games ({} turns) in {:.1}s",
            s.games,
            s.turns,
            elapsed.as_secs_f64()
        );
        eprintln!(
            "Checks: {} applied, {} cancelled, {} rejected, {} declined; {} aids; {} structures built",
            s.applied, s.cancelled, s.rejected, s.declined, s.aids, s.built
        );
        eprintln!("Invariant violations: {}", s.violations);
    }

    let written = match &output_path {
        Some(path) => File::create(path)
            .and_then(|file| autoplay::write_jsonl(&games, &mut BufWriter::new(file))),
        None => {
            let stdout = io::stdout();
            autoplay::write_jsonl(&games, &mut BufWriter::new(stdout.lock()))
        }
    };
    if let Err(e) = written {
        eprintln!("failed to write output: {}", e);
        return ExitCode::FAILURE;
    }
    if let (Some(path), false) = (&output_path, quiet) {
        eprintln!("Wrote {} games to {}", games.len(), path);
    }

    if games.iter().any(|g| !g.violations.is_empty()) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_usage() {
    eprintln!("Usage: autoplay [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --games N        Number of games to play (default: 10)");
    eprintln!("  --turns N        Turns per game (default: 12)");
    eprintln!("  --players N      Players per game, 1-6 (default: 4)");
    eprintln!("  --level N        Character level (default: 3)");
    eprintln!("  --income N       Gold collected each turn (default: 3)");
    eprintln!("  --threads N      Number of parallel threads (default: 4)");
    eprintln!("  --seed N         Random seed, 0 for entropy (default: 0)");
    eprintln!("  --output FILE    Output file path (default: stdout)");
    eprintln!("  --quiet          Suppress summary output");
    eprintln!("  --help           Show this help");
}
