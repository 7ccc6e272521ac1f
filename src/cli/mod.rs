//! Command-line interface.
//!
//! - [`args`] - clap argument definitions
//! - [`commands`] - command implementations and dispatch

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};
pub use commands::{Command, CommandDispatcher, CommandEnv, CommandResult};
