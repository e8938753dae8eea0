//! Line protocol handling.
//!
//! Parses the text commands the `regency` binary reads on stdin.

pub mod parser;

pub use parser::{parse_command, Command, StartParams};
