//! CLI module
//!
//! Command-line host for the sync engine.
//!
//! # Commands
//!
//! - `run` - Sync every partition of the selected streams
//! - `validate` - Check the source definition and settings
//! - `state show` - Print persisted watermarks
//! - `state reset` - Drop watermarks of a stream, a partition, or everything

mod commands;
mod runner;

pub use commands::{Cli, Commands, ModeArg, OutputFormat, StateCommand};
pub use runner::Runner;
