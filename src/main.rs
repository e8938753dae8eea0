//! Regency: check resolution and turn coordination for a shared kingdom.
//!
//! This binary reads commands from stdin and writes one-line responses to
//! stdout. Logs go to stderr; set `RUST_LOG` to change the level.

use std::io::{self, BufRead};
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use regency::engine::Engine;
use regency::protocol::parse_command;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let mut engine = match Engine::with_builtin() {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "builtin catalog failed to load");
            return ExitCode::FAILURE;
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let cmd = match parse_command(&line) {
            Some(c) => c,
            None => continue,
        };

        match engine.handle(cmd, &mut out) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                error!(error = %e, "stdout closed");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
